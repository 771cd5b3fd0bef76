use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Local;
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;

use tensilelink::{
    BatchStatistics, DeviceLink, LinkConfig, SessionBuffer, Settings, TelemetrySample,
    TestArchive, TestMetadata,
};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("tensilelink")
        .version("0.1.0")
        .author("Test Systems Engineering Team")
        .about("🔧 TensileLink - companion for TensileOS tensile-testing rigs")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Settings file")
                .takes_value(true)
                .default_value("config.json")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("ports")
                .about("🔌 List available serial ports")
                .long_about("Enumerates host serial ports for operator selection"),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📡 Stream live telemetry from the rig")
                .long_about("Connects, starts a new measurement, and prints decoded samples")
                .arg(port_arg())
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Monitor duration in seconds (default: until link lost)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("raw")
                        .long("raw")
                        .help("Show every raw line, including menu text"),
                )
                .arg(debug_arg()),
        )
        .subcommand(
            SubCommand::with_name("record")
                .about("🧪 Record a test interactively and archive it")
                .arg(port_arg())
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Test name for the archive")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("technician")
                        .short("t")
                        .long("technician")
                        .value_name("NAME")
                        .help("Technician running the test")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("notes")
                        .long("notes")
                        .value_name("TEXT")
                        .help("Free-form notes for the header")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("project")
                        .long("project")
                        .value_name("NAME")
                        .help("Optional project annotation")
                        .takes_value(true),
                )
                .arg(debug_arg()),
        )
        .subcommand(
            SubCommand::with_name("tests")
                .about("🗂️  List archived tests")
                .arg(date_arg()),
        )
        .subcommand(
            SubCommand::with_name("stats")
                .about("📊 Batch statistics across archived tests")
                .arg(date_arg())
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .value_name("FORMAT")
                        .help("Output format")
                        .takes_value(true)
                        .possible_values(&["table", "json"])
                        .default_value("table"),
                ),
        )
        .get_matches();

    let settings_path = PathBuf::from(matches.value_of("config").unwrap());
    let mut settings = Settings::load(&settings_path);
    let verbose = matches.is_present("verbose");

    match matches.subcommand() {
        ("ports", _) => handle_ports(),
        ("monitor", Some(sub)) => handle_monitor(sub, &settings, verbose),
        ("record", Some(sub)) => handle_record(sub, &mut settings, &settings_path, verbose),
        ("tests", Some(sub)) => handle_tests(sub, &settings),
        ("stats", Some(sub)) => handle_stats(sub, &settings),
        _ => {
            println!(
                "{}",
                "No command specified. Use --help for usage information.".yellow()
            );
            println!("{}", "Quick start:".bright_green());
            println!("  {} List serial ports", "tensilelink ports".bright_cyan());
            println!(
                "  {} Watch live readings",
                "tensilelink monitor -p /dev/ttyUSB0".bright_cyan()
            );
            println!(
                "  {} Record and archive a test",
                "tensilelink record -p /dev/ttyUSB0 -n \"Weld batch 7\"".bright_cyan()
            );
            Ok(())
        }
    }
}

fn port_arg() -> Arg<'static, 'static> {
    Arg::with_name("port")
        .short("p")
        .long("port")
        .value_name("PORT")
        .help("Serial port (falls back to the last port used)")
        .takes_value(true)
}

fn debug_arg() -> Arg<'static, 'static> {
    Arg::with_name("debug")
        .long("debug")
        .help("Log every raw line and decode outcome")
}

fn date_arg() -> Arg<'static, 'static> {
    Arg::with_name("date")
        .long("date")
        .value_name("YYYY-MM-DD")
        .help("Restrict to one archive date folder")
        .takes_value(true)
}

/// Events marshaled from the reader-thread callbacks onto the CLI thread.
enum MonitorEvent {
    Sample(f64, f64, f64),
    Raw(String),
    Fault(String),
}

fn handle_ports() -> Result<(), Box<dyn Error>> {
    let ports = DeviceLink::list_ports()?;
    if ports.is_empty() {
        println!("{}", "No serial ports found.".yellow());
        return Ok(());
    }
    println!("{}", "Available serial ports:".bright_blue().bold());
    for (name, description) in ports {
        println!("  {}  {}", name.bright_cyan(), description.dimmed());
    }
    Ok(())
}

fn handle_monitor(
    matches: &ArgMatches<'_>,
    settings: &Settings,
    verbose: bool,
) -> Result<(), Box<dyn Error>> {
    let port = resolve_port(matches, settings)?;
    let duration = matches
        .value_of("duration")
        .map(str::parse::<u64>)
        .transpose()?;
    let show_raw = matches.is_present("raw");

    let (tx, rx) = mpsc::channel::<MonitorEvent>();
    let sample_tx = tx.clone();
    let raw_tx = tx.clone();
    let fault_tx = tx;

    let mut link = DeviceLink::builder(LinkConfig::default())
        .on_data(move |timestamp, current, peak| {
            let _ = sample_tx.send(MonitorEvent::Sample(timestamp, current, peak));
        })
        .on_raw_line(move |line| {
            if show_raw {
                let _ = raw_tx.send(MonitorEvent::Raw(line.to_string()));
            }
        })
        .on_error(move |message| {
            let _ = fault_tx.send(MonitorEvent::Fault(message.to_string()));
        })
        .build();
    link.set_debug(matches.is_present("debug"));

    if verbose {
        println!("{} {}", "Connecting to".dimmed(), port);
    }
    link.connect(&port)?;
    println!(
        "{} {}",
        "✅".green(),
        "Connected. Starting a new measurement...".bright_green()
    );
    link.send_start_new_test();

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(MonitorEvent::Sample(timestamp, current, peak)) => {
                println!("{timestamp:9.3} s  {current:8.3} kN  peak {peak:8.3} kN");
            }
            Ok(MonitorEvent::Raw(line)) => println!("{}", line.dimmed()),
            Ok(MonitorEvent::Fault(message)) => {
                if is_link_lost(&message) {
                    println!(
                        "{} {}",
                        "❌".red(),
                        "Link lost. Check the cable and reconnect.".bright_red()
                    );
                    return Ok(());
                }
                println!("{} {}", "⚠️".yellow(), message.yellow());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !link.is_connected() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    link.send_pause();
    link.disconnect();
    Ok(())
}

fn handle_record(
    matches: &ArgMatches<'_>,
    settings: &mut Settings,
    settings_path: &Path,
    verbose: bool,
) -> Result<(), Box<dyn Error>> {
    let port = resolve_port(matches, settings)?;
    let test_name = matches.value_of("name").unwrap().to_string();
    let technician = matches
        .value_of("technician")
        .unwrap_or(&settings.last_technician)
        .to_string();
    let notes = matches.value_of("notes").unwrap_or("").to_string();
    let project = matches.value_of("project").map(str::to_string);

    let archive = TestArchive::open(&settings.tests_directory)?;
    let session = Arc::new(Mutex::new(SessionBuffer::new()));

    let sink = Arc::clone(&session);
    let mut link = DeviceLink::builder(LinkConfig::default())
        .on_data(move |timestamp, current, peak| {
            if let Ok(mut buffer) = sink.lock() {
                buffer.push(TelemetrySample {
                    timestamp,
                    current,
                    peak,
                });
            }
        })
        .on_error(|message| {
            if is_link_lost(message) {
                eprintln!("❌ {}", message);
            } else {
                eprintln!("⚠️  {}", message);
            }
        })
        .build();
    link.set_debug(matches.is_present("debug"));

    if verbose {
        println!("{} {}", "Connecting to".dimmed(), port);
    }
    link.connect(&port)?;
    println!(
        "{} {} {}",
        "✅".green(),
        "Connected. Recording".bright_green(),
        test_name.bright_white().bold()
    );
    print_record_help();

    let stdin = io::stdin();
    let mut saved_path: Option<PathBuf> = None;
    print_prompt();
    for input in stdin.lock().lines() {
        let input = input?;
        match input.trim() {
            "s" => {
                session.lock().unwrap().clear();
                link.send_start_new_test();
                println!("{}", "🧪 New test started (peak and timestamp reset)".bright_blue());
            }
            "p" => {
                link.send_pause();
                println!("{}", "⏸  Paused".yellow());
            }
            "r" => {
                link.send_resume();
                println!("{}", "▶️  Resumed".bright_green());
            }
            "d" => {
                session.lock().unwrap().discard();
                println!("{}", "🗑  Discarded buffered samples".yellow());
            }
            "q" => {
                link.send_pause();
                let buffer = session.lock().unwrap();
                if buffer.is_empty() {
                    println!("{}", "No data captured; nothing to save.".yellow());
                } else {
                    let now = Local::now();
                    let filepath = archive.test_path_for(&test_name, now)?;
                    let metadata = TestMetadata {
                        test_name: test_name.clone(),
                        datetime: now.format("%Y-%m-%d %H:%M:%S").to_string(),
                        technician: technician.clone(),
                        notes: notes.clone(),
                        project: project.clone(),
                    };
                    archive.save_test(&filepath, &metadata, buffer.samples())?;
                    saved_path = Some(filepath);
                }
                break;
            }
            "x" => {
                println!("{}", "Exiting without saving.".yellow());
                break;
            }
            "" => {}
            other => {
                println!("{} {}", "Unknown command:".yellow(), other);
                print_record_help();
            }
        }
        print_prompt();
    }

    link.send_pause();
    link.disconnect();

    if let Some(path) = saved_path {
        println!(
            "{} {} {}",
            "💾".bright_blue(),
            "Saved".bright_green(),
            path.display().to_string().bright_white()
        );
        settings.last_port = port;
        settings.remember_technician(&technician);
        settings.save(settings_path)?;
    }
    Ok(())
}

fn handle_tests(matches: &ArgMatches<'_>, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let archive = TestArchive::open(&settings.tests_directory)?;
    let records = match matches.value_of("date") {
        Some(date) => archive.tests_on(date),
        None => archive.list_all(),
    };
    if records.is_empty() {
        println!("{}", "No archived tests found.".yellow());
        return Ok(());
    }

    println!(
        "{} {}",
        "🗂️".bright_blue(),
        format!("{} archived test(s)", records.len()).bright_blue().bold()
    );
    for record in records {
        let peak = record
            .peak_force
            .map_or_else(|| "   ?   ".to_string(), |p| format!("{p:7.3}"));
        println!(
            "  {}  {} kN  {}  {}{}",
            record.datetime.dimmed(),
            peak.bright_white(),
            record.test_name.bright_cyan(),
            record.technician.dimmed(),
            record
                .project
                .map(|p| format!("  [{p}]"))
                .unwrap_or_default()
                .dimmed()
        );
    }
    Ok(())
}

fn handle_stats(matches: &ArgMatches<'_>, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let archive = TestArchive::open(&settings.tests_directory)?;
    let records = match matches.value_of("date") {
        Some(date) => archive.tests_on(date),
        None => archive.list_all(),
    };
    let stats = BatchStatistics::new(&records);
    let summary = stats.summary();

    if matches.value_of("format") == Some("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.count == 0 {
        println!("{}", "No tests with a parseable peak force.".yellow());
        return Ok(());
    }

    println!(
        "{} {}",
        "📊".bright_blue(),
        format!("Batch statistics over {} test(s)", summary.count)
            .bright_blue()
            .bold()
    );
    println!("  {}  {:8.3} kN", "Mean peak:  ".bright_white(), summary.mean);
    println!("  {}  {:8.3} kN", "Std dev:    ".bright_white(), summary.std_dev);
    println!(
        "  {}  {:8.3} – {:.3} kN",
        "3σ band:    ".bright_white(),
        summary.lower_3sigma,
        summary.upper_3sigma
    );
    println!("  {}  {:8.3} kN", "Min:        ".bright_white(), summary.min);
    println!("  {}  {:8.3} kN", "Median:     ".bright_white(), summary.median);
    println!("  {}  {:8.3} kN", "Max:        ".bright_white(), summary.max);

    println!();
    println!("{}", "Deviation from mean:".bright_white());
    for deviation in stats.deviations() {
        let marker = if deviation.deviation.abs() > 3.0 * summary.std_dev && summary.count > 1 {
            "❗".red().to_string()
        } else {
            "  ".to_string()
        };
        println!(
            "  {}{:28}  {:8.3} kN  {:+8.3} kN",
            marker, deviation.test_name, deviation.peak_force, deviation.deviation
        );
    }
    Ok(())
}

fn resolve_port(matches: &ArgMatches<'_>, settings: &Settings) -> Result<String, Box<dyn Error>> {
    match matches.value_of("port") {
        Some(port) => Ok(port.to_string()),
        None if !settings.last_port.is_empty() => Ok(settings.last_port.clone()),
        None => Err("no serial port given; use --port or run `tensilelink ports`".into()),
    }
}

fn is_link_lost(message: &str) -> bool {
    message.to_lowercase().contains("connection lost")
}

fn print_record_help() {
    println!(
        "{}",
        "Commands: [s]tart new test  [p]ause  [r]esume  [d]iscard  [q] save & quit  [x] quit"
            .dimmed()
    );
}

fn print_prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
