use serde::{Deserialize, Serialize};

use super::MemberId;

/// 会員エンティティ - 会員名簿の1行
///
/// 会員管理コンテキスト（コア外）が所有する。コアからは読み取り専用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub name: String,
    pub contact: String,
}
