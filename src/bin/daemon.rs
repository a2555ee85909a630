use std::{env, panic, path::PathBuf, process};

use tallyd::{config::Config, start_poller, VERSION};

// Exit with an error message on failure to parse the command line.
fn parse_args(args: Vec<String>) -> Option<PathBuf> {
    if args.len() == 1 {
        return None;
    }

    if args.len() != 3 || args[1] != "--conf" {
        eprintln!("Usage: '{} [--conf <configuration file path>]'", args[0]);
        process::exit(1);
    }

    Some(PathBuf::from(args[2].to_owned()))
}

fn setup_logger(log_level: log::LevelFilter) -> Result<(), fern::InitError> {
    let dispatcher = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|dur| dur.as_secs())
                    .unwrap_or(0),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stdout());

    dispatcher.apply()?;

    Ok(())
}

// A panic in any thread should stop the main thread, and print the panic.
fn setup_panic_hook() {
    panic::set_hook(Box::new(move |panic_info| {
        let file = panic_info
            .location()
            .map(|l| l.file())
            .unwrap_or("'unknown'");
        let line = panic_info
            .location()
            .map(|l| l.line().to_string())
            .unwrap_or_else(|| "'unknown'".to_string());

        let bt = backtrace::Backtrace::new();
        let info = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned());
        log::error!(
            "panic occurred at line {} of file {}: {:?}\n{:?}",
            line,
            file,
            info,
            bt
        );

        process::exit(1);
    }));
}

fn main() {
    let args = env::args().collect();
    let config_path = parse_args(args);
    let config = Config::from_file(config_path).unwrap_or_else(|e| {
        eprintln!("Error parsing configuration: {}", e);
        process::exit(1);
    });

    setup_panic_hook();
    if let Err(e) = setup_logger(config.log_level) {
        eprintln!("Error setting up logger: {}", e);
        process::exit(1);
    }

    let mut poller = start_poller(&config).unwrap_or_else(|e| {
        log::error!("Error starting tallyd: {}", e);
        process::exit(1);
    });
    log::info!("tallyd {} started.", VERSION);

    if let Err(e) = poller.run() {
        log::error!("Fatal error: {}", e);
        process::exit(1);
    }
}
