//! Debugger host CLI: launches a debuggee, listens for its connection, and
//! logs every notification the session produces. A thin binary over
//! [`headcrab::connection::ConnectionManager`]; actual protocol logic lives
//! in the library.

use std::env;
use std::process::exit;

use headcrab::connection::ConnectionManager;
use headcrab::launcher::{self, LaunchConfig};
use headcrab::model::Process;
use log::{error, info};

fn init_logger() {
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
        .build("host.log")
        .unwrap();

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(log::LevelFilter::Info))
        .unwrap();

    log4rs::init_config(config).unwrap();
}

fn usage() -> ! {
    eprintln!(
        "usage: host <port> <interpreter> <agent-entry> <cwd> <target> [target-args...]"
    );
    exit(2);
}

fn main() {
    init_logger();

    let mut args = env::args().skip(1);
    let port: u16 = args.next().unwrap_or_else(|| usage()).parse().unwrap_or_else(|_| usage());
    let interpreter = args.next().unwrap_or_else(|| usage());
    let agent_entry = args.next().unwrap_or_else(|| usage());
    let cwd = args.next().unwrap_or_else(|| usage());
    let target = args.next().unwrap_or_else(|| usage());
    let target_args: Vec<String> = args.collect();

    let manager = match ConnectionManager::listen(port) {
        Ok(m) => m,
        Err(err) => {
            error!("failed to bind port {}: {}", port, err);
            exit(1);
        }
    };

    let correlation_id = launcher::new_correlation_id();
    let config = LaunchConfig {
        interpreter,
        agent_entry,
        cwd,
        port,
        wait_on_exception: true,
        wait_on_exit: false,
        redirect_output: true,
        target,
        target_args,
    };

    let child = match launcher::spawn(&config, &correlation_id) {
        Ok(child) => child,
        Err(err) => {
            error!("failed to spawn debuggee: {}", err);
            exit(1);
        }
    };

    info!("launched debuggee pid={}", child.id());
    manager.register_pending(Process::new(correlation_id, Some(child)));

    for update in manager {
        info!("process={:?} notification={:?}", update.process_id, update.notification);
    }
}
