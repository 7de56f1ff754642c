//! Session lifecycle tests against the scripted transport
//!
//! Covers the connection state machine end to end:
//! - Open failures and the device-absent scenario
//! - Identity availability across a connect/disconnect cycle
//! - Mid-session I/O failure and worker panics
//! - Idle streams and prompt cancellation
//!
//! Run with: `cargo test -p device --test session_tests`

use device::test_utils::{
    DEFAULT_TEST_TIMEOUT, EventRecorder, MockTransport, status_frame, wait_for,
};
use device::{DriverOptions, Gc2Driver, TransportError};
use protocol::{ConnectionState, Event, EventCategory, READ_TIMEOUT};
use std::time::{Duration, Instant};

// ============================================================================
// Test Utilities
// ============================================================================

fn driver(transport: &MockTransport) -> (Gc2Driver<MockTransport>, EventRecorder) {
    let driver = Gc2Driver::with_transport(transport.clone(), None, DriverOptions::default())
        .expect("driver should start");
    let recorder = EventRecorder::attach(&driver);
    (driver, recorder)
}

fn connection_events(recorder: &EventRecorder) -> Vec<bool> {
    recorder
        .of(EventCategory::Connection)
        .into_iter()
        .filter_map(|e| match e {
            Event::Connection(connected) => Some(connected),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Open Failures
// ============================================================================

mod open_failures {
    use super::*;

    #[test]
    fn test_device_absent() {
        let transport = MockTransport::absent();
        let (driver, recorder) = driver(&transport);

        assert!(!driver.is_device_available());
        assert!(!driver.connect());
        assert_eq!(driver.state(), ConnectionState::Disconnected);
        assert!(!driver.read_loop_active());

        driver.shutdown();
        let events = recorder.events();
        assert_eq!(events.len(), 1, "events: {:?}", events);
        match &events[0] {
            Event::Error(text) => assert!(text.contains("not found"), "got {}", text),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_access_denied_then_retry() {
        let transport = MockTransport::new();
        transport.fail_open_with(Some(TransportError::AccessDenied("busy".into())));
        let (driver, recorder) = driver(&transport);

        assert!(!driver.connect());
        assert_eq!(driver.state(), ConnectionState::Disconnected);

        transport.fail_open_with(None);
        assert!(driver.connect());
        assert!(driver.is_connected());

        driver.shutdown();
        let errors = recorder.of(EventCategory::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].payload().contains("Access denied"));
        assert_eq!(connection_events(&recorder), vec![true, false]);
    }
}

// ============================================================================
// Connected Sessions
// ============================================================================

mod connected {
    use super::*;

    #[test]
    fn test_identity_until_disconnect() {
        let transport = MockTransport::new();
        let (driver, _recorder) = driver(&transport);

        assert!(driver.device_serial().is_none());
        assert!(driver.connect());
        assert_eq!(driver.device_serial().as_deref(), Some("GC2-12345"));
        assert_eq!(driver.firmware_version().as_deref(), Some("1.2.0"));

        // Still reported while the session is idle
        std::thread::sleep(READ_TIMEOUT * 2);
        assert_eq!(driver.device_serial().as_deref(), Some("GC2-12345"));

        driver.disconnect();
        assert!(driver.device_serial().is_none());
        assert!(driver.firmware_version().is_none());
        driver.shutdown();
    }

    #[test]
    fn test_connect_is_idempotent() {
        let transport = MockTransport::new();
        let (driver, recorder) = driver(&transport);

        assert!(driver.connect());
        assert!(driver.connect());
        assert_eq!(transport.open_count(), 1);

        driver.shutdown();
        assert_eq!(connection_events(&recorder), vec![true, false]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let (driver, recorder) = driver(&transport);

        driver.disconnect();
        assert!(driver.connect());
        driver.disconnect();
        driver.disconnect();

        assert_eq!(driver.state(), ConnectionState::Disconnected);
        assert_eq!(transport.close_count(), 1);
        driver.shutdown();
        assert_eq!(connection_events(&recorder), vec![true, false]);
    }

    #[test]
    fn test_connected_implies_open_link() {
        let transport = MockTransport::new();
        let (driver, _recorder) = driver(&transport);

        for _ in 0..3 {
            assert!(driver.connect());
            assert!(driver.is_connected());
            assert!(transport.is_link_open());
            assert!(driver.read_loop_active());

            driver.disconnect();
            assert!(!driver.is_connected());
            assert!(!transport.is_link_open());
            assert!(!driver.read_loop_active());
        }
        assert_eq!(transport.open_count(), 3);
        assert_eq!(transport.close_count(), 3);
        driver.shutdown();
    }

    #[test]
    fn test_idle_stream_emits_nothing_and_cancels_promptly() {
        let transport = MockTransport::new();
        for _ in 0..5 {
            transport.queue_timeout();
        }
        let (driver, recorder) = driver(&transport);

        assert!(driver.connect());
        std::thread::sleep(READ_TIMEOUT * 4);
        assert!(driver.read_loop_active());
        assert_eq!(recorder.events(), vec![Event::Connection(true)]);

        let start = Instant::now();
        driver.disconnect();
        let elapsed = start.elapsed();
        assert!(
            elapsed < READ_TIMEOUT + Duration::from_millis(100),
            "disconnect took {:?}",
            elapsed
        );
        assert!(!driver.read_loop_active());
        driver.shutdown();
    }

    #[test]
    fn test_status_after_connect_event() {
        let transport = MockTransport::new();
        transport.queue_frame(&status_frame(true, Some((198, 206, 12))));
        let (driver, recorder) = driver(&transport);

        assert!(driver.connect());
        assert!(recorder.wait_for_count(2, DEFAULT_TEST_TIMEOUT));
        driver.shutdown();

        let events = recorder.events();
        assert_eq!(events[0], Event::Connection(true));
        match &events[1] {
            Event::DeviceStatus(status) => {
                assert!(status.is_ready);
                assert!(status.ball_detected);
                assert_eq!(status.ball_position.as_deref(), Some("198,206,12"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

// ============================================================================
// Session Failures
// ============================================================================

mod failures {
    use super::*;

    #[test]
    fn test_io_error_mid_session() {
        let transport = MockTransport::new();
        transport.queue_timeout();
        transport.queue_io_error("device unplugged");
        let (driver, recorder) = driver(&transport);

        assert!(driver.connect());
        assert!(wait_for(DEFAULT_TEST_TIMEOUT, || driver.state()
            == ConnectionState::Disconnected));
        assert!(!driver.read_loop_active());
        assert!(!transport.is_link_open());
        assert!(driver.device_serial().is_none());

        // The dead session is not torn down a second time
        driver.disconnect();
        driver.shutdown();

        assert_eq!(connection_events(&recorder), vec![true, false]);
        let errors = recorder.of(EventCategory::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].payload().contains("device unplugged"));
    }

    #[test]
    fn test_reconnect_after_io_error() {
        let transport = MockTransport::new();
        transport.queue_io_error("bus reset");
        let (driver, recorder) = driver(&transport);

        assert!(driver.connect());
        assert!(wait_for(DEFAULT_TEST_TIMEOUT, || !driver.is_connected()));

        assert!(driver.connect());
        assert!(driver.is_connected());
        assert_eq!(transport.open_count(), 2);

        driver.shutdown();
        assert_eq!(connection_events(&recorder), vec![true, false, true, false]);
    }

    #[test]
    fn test_worker_panic_settles_in_failed() {
        let transport = MockTransport::new();
        transport.queue_panic("decoder exploded");
        let (driver, recorder) = driver(&transport);

        assert!(driver.connect());
        assert!(wait_for(DEFAULT_TEST_TIMEOUT, || matches!(
            driver.state(),
            ConnectionState::Failed(_)
        )));
        assert!(!transport.is_link_open());
        assert!(!driver.read_loop_active());

        assert!(recorder.wait_until(DEFAULT_TEST_TIMEOUT, |events| events
            .contains(&Event::Connection(false))));
        let errors = recorder.of(EventCategory::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].payload().contains("decoder exploded"));

        // A failed session accepts a fresh connect
        assert!(driver.connect());
        assert!(driver.is_connected());
        driver.shutdown();
    }
}
