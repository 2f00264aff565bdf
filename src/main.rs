use std::sync::Arc;

use chrono::{Duration, Utc};
use rusty_library_lending::{
    adapters::memory::MemoryLedgerStore,
    application::{
        ServiceDependencies, lending,
        reports::{self, ReportKind},
        tasks::TaskOutcome,
    },
    domain::{
        Book, BookId, BookStatus, LendingPolicy, Member, MemberId,
        commands::{BorrowBook, ReturnBook},
    },
    ports::ScanFilter,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Demo wiring: seed an in-memory ledger, run a borrow/return cycle and
/// the analytics jobs end to end.
#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rusty_library_lending=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let today = Utc::now().date_naive();

    // Seed the ledger: catalog and member registration are external
    // concerns, so the demo wires them in directly.
    let store = MemoryLedgerStore::new();
    store.add_book(Book {
        book_id: BookId::new(1),
        title: "The Pragmatic Programmer".to_string(),
        author: "David Thomas".to_string(),
        status: BookStatus::Available,
    });
    store.add_book(Book {
        book_id: BookId::new(2),
        title: "Domain-Driven Design".to_string(),
        author: "Eric Evans".to_string(),
        status: BookStatus::Available,
    });
    store.add_member(Member {
        member_id: MemberId::new(1),
        name: "Alice".to_string(),
        contact: "alice@example.com".to_string(),
    });

    let deps = ServiceDependencies {
        store: Arc::new(store),
        policy: LendingPolicy::default(),
    };

    // A loan old enough to be overdue, and one returned the same day.
    let overdue_loan = lending::borrow_book(
        &deps,
        BorrowBook {
            book_id: BookId::new(1),
            member_id: MemberId::new(1),
            borrow_date: today - Duration::days(20),
        },
        today,
    )
    .await
    .expect("borrow failed");
    tracing::info!(loan_id = %overdue_loan.loan_id, "borrowed");

    let loan = lending::borrow_book(
        &deps,
        BorrowBook {
            book_id: BookId::new(2),
            member_id: MemberId::new(1),
            borrow_date: today,
        },
        today,
    )
    .await
    .expect("borrow failed");
    let returned = lending::return_book(
        &deps,
        ReturnBook {
            loan_id: loan.loan_id,
            return_date: today,
        },
    )
    .await
    .expect("return failed");
    tracing::info!(loan_id = %returned.loan_id, "returned");

    // Fines job with live progress.
    let handle = reports::submit_fines_job(deps.clone(), ScanFilter::default(), today);
    let mut progress = handle.progress();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow().clone();
            tracing::debug!(completed = p.completed, total = p.total, "{}", p.message);
        }
    });
    match handle.join().await {
        TaskOutcome::Done(text) => println!("--- Fines ---\n{text}"),
        outcome => tracing::warn!(?outcome, "fines job did not complete"),
    }
    let _ = watcher.await;

    // Member activity report over the whole ledger.
    let handle = reports::submit_report_job(
        deps.clone(),
        ReportKind::MemberActivity,
        ScanFilter::default(),
        today,
    );
    if let TaskOutcome::Done(text) = handle.join().await {
        println!("--- Member Activity ---\n{text}");
    }
}
