//! Transactional-session behavior: post-commit callback ordering,
//! rollback discard, and rip-job flag monotonicity.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::TestEnv;
use ripstash_core::catalog::{SuspectedContents, VideoFile, VideoType};

#[tokio::test]
async fn commit_callbacks_fire_in_registration_order() {
    let env = TestEnv::new().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut session = env.store.begin().await.unwrap();
    for i in 0..5 {
        let order = Arc::clone(&order);
        session.on_commit(move || order.lock().unwrap().push(i));
    }
    session.commit().await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn rollback_discards_pending_callbacks() {
    let env = TestEnv::new().await;
    let fired = Arc::new(AtomicUsize::new(0));

    let mut session = env.store.begin().await.unwrap();
    for _ in 0..3 {
        let fired = Arc::clone(&fired);
        session.on_commit(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    session.rollback().await.unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dropping_a_session_discards_callbacks_too() {
    let env = TestEnv::new().await;
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let mut session = env.store.begin().await.unwrap();
        let fired = Arc::clone(&fired);
        session.on_commit(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn uncommitted_rows_are_invisible() {
    let env = TestEnv::new().await;

    let mut session = env.store.begin().await.unwrap();
    session.create_rip_job(100, Some("DISC"), None).await.unwrap();
    session.rollback().await.unwrap();

    let mut session = env.store.begin().await.unwrap();
    let err = session.get_rip_job(1).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn rip_job_flags_only_move_forward() {
    let env = TestEnv::new().await;

    let mut session = env.store.begin().await.unwrap();
    let job = session.create_rip_job(100, None, None).await.unwrap();
    session.commit().await.unwrap();
    assert!(!job.rip_finished);
    assert!(!job.imported);

    let mut session = env.store.begin().await.unwrap();
    session.mark_rip_job_finished(job.id).await.unwrap();
    session.commit().await.unwrap();

    let mut session = env.store.begin().await.unwrap();
    let fetched = session.get_rip_job(job.id).await.unwrap();
    assert!(fetched.rip_finished);
    assert!(!fetched.imported);

    session.mark_rip_job_imported(job.id).await.unwrap();
    // Marking a second time is a no-op, never a regression.
    session.mark_rip_job_finished(job.id).await.unwrap();
    session.commit().await.unwrap();

    let mut session = env.store.begin().await.unwrap();
    let fetched = session.get_rip_job(job.id).await.unwrap();
    assert!(fetched.rip_finished);
    assert!(fetched.imported);
}

#[tokio::test]
async fn suspected_contents_survive_the_round_trip() {
    let env = TestEnv::new().await;
    let suspected = SuspectedContents::TvEpisodes {
        episode_tmdb_ids: vec![42, 43],
    };

    let mut session = env.store.begin().await.unwrap();
    let job = session
        .create_rip_job(100, Some("SEASON_ONE_DISC_ONE"), Some(&suspected))
        .await
        .unwrap();
    session.commit().await.unwrap();

    let mut session = env.store.begin().await.unwrap();
    let fetched = session.get_rip_job(job.id).await.unwrap();
    assert_eq!(fetched.disc_title.as_deref(), Some("SEASON_ONE_DISC_ONE"));
    assert_eq!(fetched.suspected().unwrap(), Some(suspected));
}

#[tokio::test]
async fn untagged_pagination_orders_by_start_time() {
    let env = TestEnv::new().await;

    let mut session = env.store.begin().await.unwrap();
    for (start_time, title) in [(300, "c"), (100, "a"), (200, "b")] {
        let job = session
            .create_rip_job(start_time, Some(title), None)
            .await
            .unwrap();
        session
            .insert_video_file(&VideoFile {
                id: 0,
                video_type: VideoType::Untagged,
                match_id: None,
                blob_id: format!("blob-{title}"),
                resolution_width: None,
                resolution_height: None,
                length: None,
                original_video_hash: None,
                rip_job: Some(job.id),
                extended_metadata: None,
            })
            .await
            .unwrap();
    }
    session.commit().await.unwrap();

    let mut session = env.store.begin().await.unwrap();
    let page = session.rip_jobs_with_untagged_videos(0, 2).await.unwrap();
    let titles: Vec<_> = page.iter().filter_map(|j| j.disc_title.as_deref()).collect();
    assert_eq!(titles, vec!["a", "b"]);

    let rest = session.rip_jobs_with_untagged_videos(2, 2).await.unwrap();
    let titles: Vec<_> = rest.iter().filter_map(|j| j.disc_title.as_deref()).collect();
    assert_eq!(titles, vec!["c"]);
}

#[tokio::test]
async fn tagging_removes_a_video_from_the_untagged_set() {
    let env = TestEnv::new().await;

    let mut session = env.store.begin().await.unwrap();
    let job = session.create_rip_job(100, None, None).await.unwrap();
    let video_id = session
        .insert_video_file(&VideoFile {
            id: 0,
            video_type: VideoType::Untagged,
            match_id: None,
            blob_id: "video-blob".to_string(),
            resolution_width: None,
            resolution_height: None,
            length: None,
            original_video_hash: None,
            rip_job: Some(job.id),
            extended_metadata: None,
        })
        .await
        .unwrap();

    let untagged = session.untagged_videos_in_job(job.id).await.unwrap();
    assert_eq!(untagged.len(), 1);
    assert_eq!(untagged[0].video_blob, "video-blob");

    session
        .tag_video_file(video_id, VideoType::Movie, Some(7))
        .await
        .unwrap();
    let untagged = session.untagged_videos_in_job(job.id).await.unwrap();
    assert!(untagged.is_empty());
}
