#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use anyhow::{bail, Context, Result};

use std::fs::File;

use simplelog::*;

use sunset_sftpd::{LocalServer, LogHook, SftpConfig, SftpHandler, UrlRequestHook};

#[derive(argh::FromArgs)]
/** sunset-sftpd
 * SFTP server for a ssh subsystem, speaking on stdin and stdout
 */
struct Args {
    #[argh(switch, short = 'v')]
    /// verbose debug logging
    debug: bool,

    #[argh(switch)]
    /// more verbose
    trace: bool,

    #[argh(option, default = "String::from(\".\")")]
    /// directory to serve, default the current directory
    root: String,

    #[argh(option)]
    /// log to this file rather than stderr
    log_file: Option<String>,

    #[argh(option)]
    /// largest accepted packet in bytes
    max_packet: Option<usize>,

    #[argh(option)]
    /// send a request to this url for each operation
    hook_url: Option<String>,

    #[argh(option)]
    /// http method for hook requests, default POST
    hook_method: Option<String>,

    #[argh(option)]
    /// authorization header value for hook requests
    hook_auth: Option<String>,

    #[argh(option)]
    /// extra key=value form field for hook requests
    hook_extra: Vec<String>,

    #[argh(switch)]
    /// log each operation at info level
    log_hook: bool,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    setup_log(&args)?;

    run(&args).map_err(|e| {
        error!("Exit with error: {e:?}");
        e
    })
}

fn run(args: &Args) -> Result<()> {
    let mut config = SftpConfig::default();
    if let Some(m) = args.max_packet {
        config.max_packet_len = m;
    }

    let server = LocalServer::new(&args.root, &config)
        .with_context(|| format!("serving {}", args.root))?;
    info!("serving {:?}", server.root());

    let mut handler = SftpHandler::new(server, config);
    if let Some(url) = &args.hook_url {
        handler = handler.with_hook(url_hook(url, args)?);
    } else if args.log_hook {
        handler = handler.with_hook(LogHook);
    }

    let mut input = std::io::stdin().lock();
    let mut output = std::io::stdout().lock();
    handler.process_loop(&mut input, &mut output)?;
    Ok(())
}

fn url_hook(url: &str, args: &Args) -> Result<UrlRequestHook> {
    let mut hook = UrlRequestHook::new(url);
    if let Some(m) = &args.hook_method {
        hook = hook.method(m);
    }
    if let Some(a) = &args.hook_auth {
        hook = hook.auth(a);
    }
    for e in args.hook_extra.iter() {
        let Some((k, v)) = e.split_once('=') else {
            bail!("--hook-extra expects key=value, got {e:?}");
        };
        hook = hook.extra(k, v);
    }
    debug!("{hook:?}");
    Ok(hook)
}

fn setup_log(args: &Args) -> Result<()> {
    let mut conf = simplelog::ConfigBuilder::new();
    // time crate won't find the local offset in some environments,
    // UTC is fine then.
    let _ = conf.set_time_offset_to_local();
    let conf = conf.add_filter_ignore_str("ureq").build();

    let level = if args.trace {
        LevelFilter::Trace
    } else if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    // stdout carries the protocol, logs must never go there
    let logger: Box<dyn SharedLogger> = match &args.log_file {
        Some(p) => {
            let f = File::options()
                .create(true)
                .append(true)
                .open(p)
                .with_context(|| format!("opening log file {p}"))?;
            WriteLogger::new(level, conf, f)
        }
        None => TermLogger::new(level, conf, TerminalMode::Stderr, ColorChoice::Auto),
    };
    CombinedLogger::init(vec![logger]).context("setting up logging")?;
    Ok(())
}
