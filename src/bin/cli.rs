use anyhow::{anyhow, bail, Context};
use rigstream::testing::{shifted_frame, SimulatedActuator, SimulatedFocusCamera};
use rigstream::{EngineKind, RigConfig, RigSession, ScanStatus};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    rigstream::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: rigstream-sim <stream|scan|config> [args]");
        std::process::exit(1);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    let command = &args[1];
    match command.as_str() {
        "stream" => cmd_stream(&args, &interrupted),
        "scan" => cmd_scan(&args, &interrupted),
        "config" => cmd_config(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

/// Options shared by the simulation commands
struct CommonArgs {
    config: RigConfig,
    json: bool,
}

fn load_config(args: &[String]) -> anyhow::Result<RigConfig> {
    match flag_value(args, "--config") {
        Some(path) => Ok(RigConfig::load_from_file(path)?),
        None => Ok(RigConfig::load_or_default()),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_dims(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {}", s))?;
    Ok((w.parse()?, h.parse()?))
}

fn common_args(args: &[String]) -> anyhow::Result<CommonArgs> {
    let mut config = load_config(args)?;
    if let Some(size) = flag_value(args, "--size") {
        let (w, h) = parse_dims(size)?;
        config.stream.frame_width = w;
        config.stream.frame_height = h;
    }
    Ok(CommonArgs {
        config,
        json: args.contains(&"--json".to_string()),
    })
}

/// Camera shake used by the stream simulation, in whole pixels.
fn jitter(i: u64) -> (i64, i64) {
    let t = i as f64;
    ((6.0 * (t * 0.4).sin()).round() as i64, (4.0 * (t * 0.3).cos()).round() as i64)
}

fn cmd_stream(args: &[String], interrupted: &Arc<AtomicBool>) -> anyhow::Result<()> {
    // Parse args: stream [--frames <n>] [--engine phase|correlation] [--size WxH] [--json]
    let CommonArgs { mut config, json } = common_args(args)?;
    let mut frames: u64 = 30;
    if let Some(n) = flag_value(args, "--frames") {
        frames = n.parse()?;
    }
    if let Some(name) = flag_value(args, "--engine") {
        config.stabilisation.engine =
            EngineKind::parse(name).ok_or_else(|| anyhow!("unknown engine: {}", name))?;
    }
    config.stabilisation.enabled = true;
    let (width, height) = (config.stream.frame_width, config.stream.frame_height);

    let session = RigSession::open(config)?;
    let sink = session.start_streaming()?;
    let processor = session
        .processor()
        .ok_or_else(|| anyhow!("processor missing after start"))?;
    let signal = processor.new_frame_signal();

    let producer = {
        let stop = Arc::clone(interrupted);
        thread::spawn(move || {
            for i in 0..frames {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let (dx, dy) = jitter(i);
                if sink.push(shifted_frame(width, height, 42, dx, dy)).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    let mut received = 0u64;
    while received < frames && !interrupted.load(Ordering::SeqCst) {
        let Ok(sequence) = signal.recv_timeout(Duration::from_millis(500)) else {
            if producer.is_finished() {
                // Remaining frames were dropped by the bounded queue
                break;
            }
            continue;
        };
        let Some(composite) = processor.get_frame() else {
            continue;
        };
        let (dx, dy) = jitter(sequence);
        if json {
            println!("{}", serde_json::to_string(&*composite)?);
        } else {
            println!(
                "Frame {:>4}: offset ({:>6.2}, {:>6.2})  shake ({:>3}, {:>3})",
                composite.sequence, composite.offset.x, composite.offset.y, dx, dy
            );
        }
        let _ = processor.release_frame();
        received += 1;
    }

    let _ = producer.join();
    let stats = processor.stats();
    session.close()?;

    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!(
            "Processed {} frames, {} stabilised, {} failures",
            stats.frames_processed, stats.frames_stabilised, stats.stabilise_failures
        );
    }
    Ok(())
}

fn cmd_scan(args: &[String], interrupted: &Arc<AtomicBool>) -> anyhow::Result<()> {
    // Parse args: scan [--grid WxH] [--steps <n>] [--size WxH] [--save <path>] [--json]
    let CommonArgs { mut config, json } = common_args(args)?;
    if let Some(grid) = flag_value(args, "--grid") {
        let (w, h) = parse_dims(grid)?;
        config.depth_map.grid_width = w;
        config.depth_map.grid_height = h;
    }
    if let Some(steps) = flag_value(args, "--steps") {
        config.depth_map.focus_steps = steps.parse()?;
    }
    let save = flag_value(args, "--save").map(PathBuf::from);

    let (width, height) = (config.stream.frame_width, config.stream.frame_height);
    let (cols, rows) = (config.depth_map.grid_width, config.depth_map.grid_height);

    let session = RigSession::open(config)?;
    let sink = session.start_streaming()?;

    let actuator = SimulatedActuator::new();
    let camera = SimulatedFocusCamera::new(width, height, cols, rows, actuator.position_handle());
    let camera_running = Arc::new(AtomicBool::new(true));
    let producer = {
        let running = Arc::clone(&camera_running);
        let position = actuator.position_handle();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let captured_at = Instant::now();
                let lens = *position.lock().unwrap_or_else(|p| p.into_inner());
                if sink.push_captured_at(camera.render(lens), captured_at).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    session.start_depth_scan(Box::new(actuator.clone()))?;
    // Ends on completion, cancellation or a panicked scan thread
    let mut last_visited = 0;
    while session.is_scanning() {
        if interrupted.load(Ordering::SeqCst) {
            session.cancel_scan();
        }
        let visited = session.depth_map().map_or(0, |m| m.cells_visited);
        if visited != last_visited && !json {
            eprint!("\r  {} of {} cells", visited, cols * rows);
            last_visited = visited;
        }
        thread::sleep(Duration::from_millis(50));
    }
    if last_visited > 0 && !json {
        eprintln!();
    }
    let report = session.wait_scan();

    camera_running.store(false, Ordering::SeqCst);
    session.close()?;
    let _ = producer.join();

    let report = report?;
    let map = session
        .depth_map()
        .ok_or_else(|| anyhow!("scan produced no depth map"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "report": report,
            "depth_map": map,
        }))?);
    } else {
        println!(
            "Scan {:?}: {} of {} cells in {} ms ({} moves)",
            report.status,
            report.cells_visited,
            map.cell_count(),
            report.duration_ms,
            report.moves
        );
        for row in map.cells.chunks(map.width as usize) {
            let line: Vec<String> = row
                .iter()
                .map(|c| match c {
                    Some(cell) => format!("{:5.2}", cell.focus_position),
                    None => "  -  ".to_string(),
                })
                .collect();
            println!("  {}", line.join(" "));
        }
    }

    if let Some(path) = save {
        if report.status != ScanStatus::Completed {
            bail!("scan did not complete; not saving {}", path.display());
        }
        map.to_focus_image(16)
            .save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        if !json {
            println!("Saved focus image to {}", path.display());
        }
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    match flag_value(args, "--write") {
        Some(path) => {
            config.save_to_file(path)?;
            println!("Wrote {}", path);
        }
        None => print!("{}", toml::to_string_pretty(&config)?),
    }
    Ok(())
}
