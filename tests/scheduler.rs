use chrono::{Days, Duration as ChronoDuration, Local, TimeZone};
use std::time::Duration;
use tidyflow::fs::MemoryDirHandle;
use tidyflow::storage::Storage;
use tidyflow::transfer::scheduler::SchedulerConfig;
use tidyflow::transfer::{
    EngineOptions, Schedule, ScheduleKind, Scheduler, Task, TaskFilter, TransferEngine,
};
use tokio::sync::watch;

async fn scheduler() -> (Storage, Scheduler) {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    storage.run_migrations().await.unwrap();
    let engine = TransferEngine::new(
        storage.clone(),
        EngineOptions {
            copy_buffer_bytes: 8192,
            inter_file_pause: Duration::ZERO,
        },
    );
    let (_tx, rx) = watch::channel(false);
    // The channel sender is dropped on purpose: these tests drive
    // poll_once directly instead of the loop.
    let scheduler = Scheduler::new(storage.clone(), engine, SchedulerConfig::default(), rx);
    (storage, scheduler)
}

fn mem_task(source: &str, destination: &str, schedule: Schedule) -> Task {
    let mut task = Task::new(
        &format!("mem:{source}"),
        &format!("mem:{destination}"),
        TaskFilter::Extension("mp3".to_string()),
    );
    task.schedule = schedule;
    task
}

#[tokio::test]
async fn due_once_task_runs_and_deactivates() {
    MemoryDirHandle::reset("sch-once-src");
    MemoryDirHandle::reset("sch-once-dst");
    let src = MemoryDirHandle::open("sch-once-src");
    src.put_file("song.mp3", b"audio");
    let dst = MemoryDirHandle::open("sch-once-dst");

    let (storage, scheduler) = scheduler().await;
    let stored = (Local::now() - ChronoDuration::minutes(5)).timestamp_millis();
    let task = mem_task(
        "sch-once-src",
        "sch-once-dst",
        Schedule {
            kind: ScheduleKind::Once,
            next_run_time: Some(stored),
        },
    );
    storage.add_task(&task).await.unwrap();

    assert_eq!(scheduler.poll_once().await.unwrap(), 1);

    // The files moved and the task will never fire again
    assert_eq!(dst.read_file("song.mp3").unwrap(), b"audio");
    assert!(src.file_names().is_empty());

    let stored_task = storage.get_task(&task.id).await.unwrap().unwrap();
    assert!(!stored_task.active);
    assert_eq!(stored_task.schedule.kind, ScheduleKind::Never);
    assert_eq!(stored_task.schedule.next_run_time, Some(stored));

    // A follow-up poll finds nothing to do
    assert_eq!(scheduler.poll_once().await.unwrap(), 0);

    let summaries = storage.load_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].file_count, 1);
}

#[tokio::test]
async fn due_daily_task_runs_and_advances_a_day() {
    MemoryDirHandle::reset("sch-daily-src");
    MemoryDirHandle::reset("sch-daily-dst");
    let src = MemoryDirHandle::open("sch-daily-src");
    src.put_file("song.mp3", b"audio");
    let dst = MemoryDirHandle::open("sch-daily-dst");

    let (storage, scheduler) = scheduler().await;
    // Due yesterday a little earlier in the day, so today's run time has
    // already been reached
    let stored = (Local::now() - ChronoDuration::days(1) - ChronoDuration::minutes(5))
        .timestamp_millis();
    let task = mem_task(
        "sch-daily-src",
        "sch-daily-dst",
        Schedule {
            kind: ScheduleKind::Daily,
            next_run_time: Some(stored),
        },
    );
    storage.add_task(&task).await.unwrap();

    assert_eq!(scheduler.poll_once().await.unwrap(), 1);
    assert_eq!(dst.read_file("song.mp3").unwrap(), b"audio");

    // Still active, rescheduled for tomorrow's occurrence of the same
    // time of day: two calendar days past the stored timestamp
    let stored_task = storage.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored_task.active);
    assert_eq!(stored_task.schedule.kind, ScheduleKind::Daily);
    let expected = Local
        .timestamp_millis_opt(stored)
        .single()
        .unwrap()
        .checked_add_days(Days::new(2))
        .unwrap()
        .timestamp_millis();
    assert_eq!(stored_task.schedule.next_run_time, Some(expected));

    // Not due again until then
    assert_eq!(scheduler.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn future_task_is_left_alone() {
    MemoryDirHandle::reset("sch-future-src");
    MemoryDirHandle::reset("sch-future-dst");
    let src = MemoryDirHandle::open("sch-future-src");
    src.put_file("song.mp3", b"audio");
    MemoryDirHandle::open("sch-future-dst");

    let (storage, scheduler) = scheduler().await;
    let stored = (Local::now() + ChronoDuration::hours(2)).timestamp_millis();
    let task = mem_task(
        "sch-future-src",
        "sch-future-dst",
        Schedule {
            kind: ScheduleKind::Once,
            next_run_time: Some(stored),
        },
    );
    storage.add_task(&task).await.unwrap();

    assert_eq!(scheduler.poll_once().await.unwrap(), 0);
    assert_eq!(src.file_names(), vec!["song.mp3"]);

    let stored_task = storage.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored_task.active);
    assert_eq!(stored_task.schedule.next_run_time, Some(stored));
}

#[tokio::test]
async fn failing_task_does_not_block_the_rest_of_the_cycle() {
    MemoryDirHandle::reset("sch-bad-src");
    MemoryDirHandle::reset("sch-bad-dst");
    MemoryDirHandle::reset("sch-good-src");
    MemoryDirHandle::reset("sch-good-dst");

    let bad_src = MemoryDirHandle::open("sch-bad-src");
    bad_src.set_missing(true);
    MemoryDirHandle::open("sch-bad-dst");

    let good_src = MemoryDirHandle::open("sch-good-src");
    good_src.put_file("song.mp3", b"audio");
    let good_dst = MemoryDirHandle::open("sch-good-dst");

    let (storage, scheduler) = scheduler().await;
    let stored = (Local::now() - ChronoDuration::minutes(5)).timestamp_millis();
    let once = |next| Schedule {
        kind: ScheduleKind::Once,
        next_run_time: Some(next),
    };

    let bad = mem_task("sch-bad-src", "sch-bad-dst", once(stored));
    let good = mem_task("sch-good-src", "sch-good-dst", once(stored + 1));
    storage.add_task(&bad).await.unwrap();
    storage.add_task(&good).await.unwrap();

    // Both are attempted; the missing source does not stop the cycle
    assert_eq!(scheduler.poll_once().await.unwrap(), 2);
    assert_eq!(good_dst.read_file("song.mp3").unwrap(), b"audio");
    assert!(good_src.file_names().is_empty());

    // Both once-schedules are spent
    assert!(!storage.get_task(&bad.id).await.unwrap().unwrap().active);
    assert!(!storage.get_task(&good.id).await.unwrap().unwrap().active);
}
