//! Task lifecycle end-to-end: every task reaches exactly one terminal
//! disposition, and cleanup happens exactly where the contract says it does.

use std::sync::Arc;

use ihw_backend::tasks::TaskTracker;

#[test]
fn completed_task_keeps_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("part1.pdf");
    let b = dir.path().join("part2.pdf");
    std::fs::write(&a, b"one").unwrap();
    std::fs::write(&b, b"two").unwrap();

    let tracker = TaskTracker::new();
    tracker.register_output("split-1", &a);
    tracker.register_output("split-1", &b);
    tracker.complete("split-1");

    assert!(a.exists());
    assert!(b.exists());
    assert_eq!(tracker.active_count(), 0);
}

#[test]
fn failed_task_cleans_every_output_including_directories() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("pages");
    std::fs::create_dir_all(&out_dir).unwrap();
    std::fs::write(out_dir.join("page_1.png"), b"x").unwrap();
    let stray = dir.path().join("cover.png");
    std::fs::write(&stray, b"y").unwrap();

    let tracker = TaskTracker::new();
    tracker.register_output("render-1", &out_dir);
    tracker.register_output("render-1", &stray);
    tracker.fail_and_clean("render-1");

    assert!(!out_dir.exists(), "directories are removed recursively");
    assert!(!stray.exists());
}

#[test]
fn cancel_then_failure_surfacing_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("video.mp4");
    std::fs::write(&out, b"frames").unwrap();

    let tracker = TaskTracker::new();
    tracker.register_output("enc-1", &out);

    // Reader loop handles the cancel first and deletes the file.
    assert!(tracker.request_cancel("enc-1"));
    assert!(!out.exists());
    assert!(tracker.is_cancelled("enc-1"));

    // The worker then surfaces the cancellation as a failure; the second
    // cleanup pass finds nothing and must not error.
    tracker.fail_and_clean("enc-1");
    assert!(!tracker.is_cancelled("enc-1"));
    assert_eq!(tracker.active_count(), 0);
}

#[test]
fn cancelling_a_finished_task_cannot_delete_its_results() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("merged.pdf");
    std::fs::write(&out, b"final").unwrap();

    let tracker = TaskTracker::new();
    tracker.register_output("merge-1", &out);
    tracker.complete("merge-1");

    // A cancel racing in after completion is a safe no-op.
    assert!(tracker.request_cancel("merge-1"));
    assert!(out.exists(), "completed outputs are never deleted");
}

#[test]
fn cancel_for_an_unknown_task_sets_a_flag_a_later_job_observes() {
    let tracker = TaskTracker::new();
    assert!(tracker.request_cancel("not-yet-queued"));
    // The flag persists so the job short-circuits if it ever starts.
    assert!(tracker.is_cancelled("not-yet-queued"));
    tracker.fail_and_clean("not-yet-queued");
    assert!(!tracker.is_cancelled("not-yet-queued"));
}

#[test]
fn registration_after_cancel_is_cleaned_at_the_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let late = dir.path().join("late.png");

    let tracker = TaskTracker::new();
    tracker.request_cancel("gif-1");

    // A handler that has not yet observed the flag may still register.
    std::fs::write(&late, b"frame").unwrap();
    tracker.register_output("gif-1", &late);
    assert!(late.exists(), "registration alone never deletes");

    tracker.fail_and_clean("gif-1");
    assert!(!late.exists(), "the terminal pass sweeps late registrations");
}

#[test]
fn concurrent_cancels_and_registrations_never_lose_paths() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = Arc::new(TaskTracker::new());

    let mut handles = Vec::new();
    for i in 0..8 {
        let tracker = Arc::clone(&tracker);
        let path = dir.path().join(format!("out-{i}.bin"));
        std::fs::write(&path, b"data").unwrap();
        handles.push(std::thread::spawn(move || {
            let task = format!("task-{i}");
            tracker.register_output(&task, &path);
            if i % 2 == 0 {
                tracker.request_cancel(&task);
            } else {
                tracker.complete(&task);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for i in 0..8 {
        let path = dir.path().join(format!("out-{i}.bin"));
        if i % 2 == 0 {
            assert!(!path.exists(), "cancelled task {i} must be cleaned");
        } else {
            assert!(path.exists(), "completed task {i} must keep its file");
        }
    }
    assert_eq!(tracker.active_count(), 0);
}

#[test]
fn tasks_with_the_same_output_path_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared.pdf");
    std::fs::write(&shared, b"v1").unwrap();

    let tracker = TaskTracker::new();
    tracker.register_output("t1", &shared);
    tracker.register_output("t2", &shared);

    // t1 succeeds first; its bookkeeping disappears but t2 still tracks
    // the path and cleans it on failure.
    tracker.complete("t1");
    assert!(shared.exists());
    tracker.fail_and_clean("t2");
    assert!(!shared.exists());
}
