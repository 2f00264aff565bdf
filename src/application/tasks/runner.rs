use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// ジョブID - 投入ごとに採番される
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 進捗報告：(処理済み, 総数) とステータスメッセージ
///
/// ベストエフォートであり、正しさには使わない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
    pub message: String,
}

/// ジョブ実行中のエラー
#[derive(Debug, Error)]
pub enum TaskError {
    /// ジョブ本体の失敗（ストア障害など）。ランナーが捕捉して呼び出し側に
    /// 渡すもので、呼び出し側をクラッシュさせることはない。
    #[error("job failed")]
    Job(#[source] BoxError),

    /// ジョブ本体のパニック
    #[error("job panicked")]
    Panicked,
}

/// ジョブの終端状態
///
/// 投入1回につきちょうど1つだけ発生する。Cancelledはエラーではなく
/// 正常な終端状態のひとつ。
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    Cancelled,
    Failed(TaskError),
}

/// ジョブ本体へ渡される実行コンテキスト
///
/// 協調的キャンセルフラグと進捗チャネルを運ぶ。ジョブは走査の各反復の
/// 先頭で`is_cancelled`を確認し、キャンセルを観測したら（エラーにせず）
/// 定義済みの部分結果を返すこと。
#[derive(Clone)]
pub struct TaskContext {
    cancelled: Arc<AtomicBool>,
    progress: watch::Sender<Progress>,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// 進捗を報告する。processedが後退する更新は捨てて単調性を保つ。
    pub fn report(&self, completed: u64, total: u64, message: impl Into<String>) {
        let next = Progress {
            completed,
            total,
            message: message.into(),
        };
        self.progress.send_if_modified(move |current| {
            if next.completed < current.completed {
                return false;
            }
            *current = next.clone();
            true
        });
    }
}

/// 投入済みジョブへのハンドル
///
/// ハンドル1つにつき実行中のジョブは最多1つ。終端状態は`join`で
/// ちょうど一度だけ受け取る。新しいジョブを投入する前に実行中の
/// ものを取り消すかどうかは呼び出し側の方針に委ねる。
pub struct TaskHandle<T> {
    id: JobId,
    cancelled: Arc<AtomicBool>,
    progress: watch::Receiver<Progress>,
    outcome: oneshot::Receiver<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// 協調的キャンセルを要求する。冪等で、完了後の呼び出しは無効。
    /// ワーカーを強制終了することはない。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// 進捗の購読チャネル
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// 終端状態を待つ。ハンドルを消費するため、結果は一度しか
    /// 観測できない（Done/Failed/Cancelledのいずれかちょうど1つ）。
    pub async fn join(self) -> TaskOutcome<T> {
        match self.outcome.await {
            Ok(outcome) => outcome,
            // 終端報告前にワーカーごと破棄された場合のみ
            Err(_) => TaskOutcome::Failed(TaskError::Panicked),
        }
    }
}

/// ジョブを専用ワーカーに投入する
///
/// ジョブは呼び出し側のスレッドでは決して実行されない。パニックを含む
/// ジョブ内のあらゆる失敗はランナーが捕捉し、終端状態として渡す。
/// キャンセルフラグが立った状態で終わったジョブの結果は破棄され、
/// 終端状態はCancelledになる。
pub fn submit<F, Fut, T>(job: F) -> TaskHandle<T>
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    let id = JobId::new();
    let cancelled = Arc::new(AtomicBool::new(false));
    let (progress_tx, progress_rx) = watch::channel(Progress::default());
    let (outcome_tx, outcome_rx) = oneshot::channel();

    let ctx = TaskContext {
        cancelled: cancelled.clone(),
        progress: progress_tx,
    };
    let flag = cancelled.clone();

    tokio::spawn(async move {
        let result = AssertUnwindSafe(async move { job(ctx).await })
            .catch_unwind()
            .await;

        let outcome = match result {
            Err(_) => {
                tracing::error!(job_id = %id, "job panicked");
                TaskOutcome::Failed(TaskError::Panicked)
            }
            Ok(_) if flag.load(Ordering::Relaxed) => {
                tracing::debug!(job_id = %id, "job cancelled");
                TaskOutcome::Cancelled
            }
            Ok(Err(err)) => {
                tracing::warn!(job_id = %id, error = %err, "job failed");
                TaskOutcome::Failed(TaskError::Job(err))
            }
            Ok(Ok(value)) => TaskOutcome::Done(value),
        };

        // 受け手が先にいなくなっていても構わない
        let _ = outcome_tx.send(outcome);
    });

    TaskHandle {
        id,
        cancelled,
        progress: progress_rx,
        outcome: outcome_rx,
    }
}
