//! Host-side exercise of `connection::ConnectionManager` + `session::Session`
//! + `model::Process` together over a real loopback socket, standing in for
//! a debuggee agent without actually spawning one.

use std::net::TcpStream;
use std::time::Duration;

use headcrab::codec::Writer;
use headcrab::command::Event;
use headcrab::connection::ConnectionManager;
use headcrab::model::Process;
use headcrab::session::Notification;

fn send_event(stream: &mut TcpStream, event: &Event) {
    let mut w = Writer::new();
    event.encode(&mut w);
    w.send_length_prefixed(stream).unwrap();
}

#[test]
fn connected_process_receives_handshake_and_thread_notifications() {
    let port = 58231;
    let manager = ConnectionManager::listen(port).expect("bind manager port");

    let correlation_id = [3u8; 16];
    manager.register_pending(Process::new(correlation_id, None));

    let mut debuggee = TcpStream::connect(("127.0.0.1", port)).expect("connect debuggee socket");
    send_event(
        &mut debuggee,
        &Event::Connected {
            correlation_id,
            ok: true,
        },
    );
    send_event(&mut debuggee, &Event::ThreadCreated { tid: 1 });
    send_event(
        &mut debuggee,
        &Event::ModuleLoaded {
            module_id: 1,
            file: "s.py".to_string(),
        },
    );

    let connected = manager.recv().expect("connected notification");
    assert_eq!(connected.process_id, correlation_id);
    assert_eq!(connected.notification, Notification::Connected { ok: true });

    let thread_created = manager.recv().expect("thread-created notification");
    assert_eq!(
        thread_created.notification,
        Notification::ThreadCreated { tid: 1 }
    );

    let module_loaded = manager.recv().expect("module-loaded notification");
    assert_eq!(
        module_loaded.notification,
        Notification::ModuleLoaded {
            module_id: 1,
            file: "s.py".to_string()
        }
    );

    let found = manager
        .with_process(&correlation_id, |p| p.threads.contains_key(&1))
        .unwrap();
    assert!(found, "thread 1 should be in the process's thread map");

    // give the reader thread a moment to notice the drop before the test
    // process exits, so the connection closes cleanly rather than racing.
    drop(debuggee);
    std::thread::sleep(Duration::from_millis(50));
}

#[test]
fn connection_with_unknown_correlation_id_is_dropped_silently() {
    let port = 58232;
    let manager = ConnectionManager::listen(port).expect("bind manager port");

    let mut stranger = TcpStream::connect(("127.0.0.1", port)).expect("connect stranger socket");
    send_event(
        &mut stranger,
        &Event::Connected {
            correlation_id: [9u8; 16],
            ok: true,
        },
    );

    // No process was ever registered for this id, so no notification should
    // ever arrive; a bounded wait stands in for "never".
    let result = manager.recv_timeout(Duration::from_millis(200));
    assert!(result.is_none());
}
