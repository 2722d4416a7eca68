mod common;

use common::*;
use frametrace::FrameTracer;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_session_trace() {
    let mut session = Session::new();
    session.consumer.extend([
        format!("1005 [STAT ][cchannel-iqueue]-iqueue: express {NAME}"),
        "1012 [STAT ][vconsumer-buffer-pqueue]-buffer: shortdump push [12(30|1)13(40|0.5)]".into(),
        format!("1018 [TRACE][vconsumer]-pipeliner: data {NAME}"),
    ]);
    session
        .producer
        .push(format!("5008 [TRACE][vsender]-sender: published {NAME}"));
    session.local_daemon = Some(vec![format!(
        "1375815442.010000 ndnd[311]: interest_to 3 ccnx:{NAME}"
    )]);
    session.remote_daemon = Some(vec![format!(
        "1375815442.009000 ndnd[97]: interest_from 5 ccnx:{NAME}"
    )]);

    let tracer = FrameTracer::new(session.config()).unwrap();
    assert_eq!(tracer.alignment().offset_ms(), -4000);

    let summary = timeout(Duration::from_secs(30), tracer.run())
        .await
        .expect("tracer hung")
        .unwrap();

    assert_eq!(summary.workers.len(), 4);
    assert_eq!(summary.aggregator.stored, 6);
    assert_eq!(
        session.report(),
        "1000:\n\
         +5\tI->DELTA-DATA 14:0\t\t\t\t\n\
         +8\t\t\t\t\tP: DELTA-DATA 14:0\n\
         +9\t\t\t\t->DELTA-DATA 14:0\t\n\
         +10\t\t\t-->DELTA-DATA 14:0\t\t\n\
         +12\t\tpush [12(30|1)13(40|0.5)]\t\t\t\n\
         +18\tD<-DELTA-DATA 14:0\t\t\t\t\n"
    );
}

#[tokio::test]
async fn test_ntp_delays_refine_offset() {
    let mut session = Session::new();
    session.consumer_ntp = Some(ntpq_output(1.5));
    session.producer_ntp = Some(ntpq_output(0.5));
    session
        .producer
        .push(format!("5008 [TRACE][vsender]-sender: published {NAME}"));

    let tracer = FrameTracer::new(session.config()).unwrap();
    assert_eq!(tracer.alignment().offset_ms(), -3999);

    tracer.run().await.unwrap();
    assert_eq!(session.report(), "1000:\n+9\t\t\t\t\tP: DELTA-DATA 14:0\n");
}

#[tokio::test]
async fn test_missing_marker_keeps_producer_clock() {
    let mut session = Session::new();
    session.producer = vec![format!("20 [TRACE][vsender]-sender: published {NAME}")];
    session.remote_daemon = Some(vec![format!(
        "1375815442.009000 ndnd[97]: interest_from 5 ccnx:{NAME}"
    )]);

    let tracer = FrameTracer::new(session.config()).unwrap();
    assert!(!tracer.alignment().is_aligned());
    assert_eq!(tracer.alignment().offset_ms(), 0);

    let summary = tracer.run().await.unwrap();
    // The daemon line cannot be placed without the producer marker.
    assert_eq!(summary.workers[1].matched, 0);
    assert_eq!(session.report(), "20:\n+0\t\t\t\t\tP: DELTA-DATA 14:0\n");
}

#[tokio::test]
async fn test_missing_daemon_log_fails_after_writing() {
    let mut session = Session::new();
    session
        .consumer
        .push(format!("1005 [STAT ][cchannel-iqueue]-iqueue: express {NAME}"));

    let mut config = session.config();
    config.sources.local_daemon_log = Some(session.dir.path().join("absent-ndnd.log"));

    let tracer = FrameTracer::new(config).unwrap();
    let err = timeout(Duration::from_secs(30), tracer.run())
        .await
        .expect("tracer hung")
        .unwrap_err();

    assert!(format!("{err:#}").contains("absent-ndnd.log"));
    assert_eq!(session.report(), "1000:\n+5\tI->DELTA-DATA 14:0\t\t\t\t\n");
}

#[tokio::test]
async fn test_output_is_truncated() {
    let session = Session::new();
    let config = session.config();
    std::fs::write(&config.output, "old report\n").unwrap();

    FrameTracer::new(config).unwrap().run().await.unwrap();
    assert_eq!(session.report(), "");
}
