// Proctoring Hub CLI
// Drives a running hub from the terminal: health checks, fake exam-takers and observers

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// Any JPEG-looking payload will do; the hub never decodes frames
const FAKE_FRAME: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQAAAQABAAD/2wBDAP";

#[derive(Parser)]
#[command(name = "proctor-cli")]
#[command(about = "Proctoring Hub CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:5000)
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get sampling configuration and pool counts
    Config,

    /// Join as an exam-taker and stream frames while monitored
    Student {
        /// Session ID
        #[arg(short = 'i', long)]
        session_id: String,

        /// Display name (defaults to the session ID)
        #[arg(short, long)]
        name: Option<String>,

        /// Test ID
        #[arg(short, long, default_value = "1")]
        test_id: String,

        /// Test title
        #[arg(long, default_value = "CLI Test")]
        test_title: String,

        /// Seconds to stay connected (0 = until Ctrl+C)
        #[arg(short, long, default_value_t = 0)]
        duration: u64,
    },

    /// Join the observer room and print pool updates and frames
    Observe {
        /// Seconds to stay connected (0 = until Ctrl+C)
        #[arg(short, long, default_value_t = 0)]
        duration: u64,

        /// Print every frame instead of a per-session tally
        #[arg(short, long)]
        verbose: bool,
    },

    /// Ask the hub to resample the monitored pool now
    Refresh,

    /// Connect many exam-takers and one observer, then report what was relayed
    Simulate {
        /// Number of exam-takers
        #[arg(short = 'n', long, default_value_t = 40)]
        students: usize,

        /// Seconds to run
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Student {
            session_id,
            name,
            test_id,
            test_title,
            duration,
        } => {
            let name = name.clone().unwrap_or_else(|| session_id.clone());
            run_student(&cli.server, session_id, &name, test_id, test_title, *duration).await;
        }
        Commands::Observe { duration, verbose } => {
            run_observer(&cli.server, *duration, *verbose).await;
        }
        Commands::Refresh => {
            request_refresh(&cli.server).await;
        }
        Commands::Simulate { students, duration } => {
            simulate(&cli.server, *students, *duration).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Uptime: {}s", body["uptimeSecs"].as_u64().unwrap_or(0));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching proctoring configuration...".cyan());

    let url = format!("http://{}/proctoring/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("\nConfiguration:");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
                    );
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn connect(server: &str) -> Option<(WsWrite, WsRead)> {
    let url = format!("ws://{}/proctoring", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => Some(ws_stream.split()),
        Err(e) => {
            println!("{} Cannot connect to {}: {}", "✗".red(), url, e);
            None
        }
    }
}

async fn send_event(write: &mut WsWrite, event: &str, data: Value) -> bool {
    let msg = json!({ "event": event, "data": data });
    write.send(Message::Text(msg.to_string())).await.is_ok()
}

/// Next hub event as (name, payload), or None once the socket is gone.
async fn next_event(read: &mut WsRead) -> Option<(String, Value)> {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let name = value["event"].as_str().unwrap_or_default().to_string();
                return Some((name, value["data"].clone()));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

fn deadline(duration: u64) -> Option<Instant> {
    (duration > 0).then(|| Instant::now() + Duration::from_secs(duration))
}

fn test_id_value(raw: &str) -> Value {
    raw.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(raw))
}

async fn run_student(
    server: &str,
    session_id: &str,
    name: &str,
    test_id: &str,
    test_title: &str,
    duration: u64,
) {
    println!("{}", "Joining as exam-taker...".cyan());
    println!("  Session ID: {}", session_id);
    println!("  Name: {}", name);

    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    let joined = send_event(
        &mut write,
        "join-proctoring",
        json!({
            "sessionId": session_id,
            "displayName": name,
            "testId": test_id_value(test_id),
            "testTitle": test_title,
        }),
    )
    .await;
    if !joined {
        println!("{} Failed to send join-proctoring", "✗".red());
        return;
    }
    println!("{} join-proctoring sent", "✓".green());
    println!("Press {} to leave.", "Ctrl+C".bold());

    let mut monitored = false;
    let mut frame_rate = 1u32;
    let mut frames_sent = 0u64;
    let mut ticker = interval(Duration::from_secs(1));
    let stop_at = deadline(duration);

    loop {
        if stop_at.is_some_and(|at| Instant::now() >= at) {
            break;
        }

        tokio::select! {
            event = next_event(&mut read) => {
                let Some((name, data)) = event else {
                    println!("{} Connection closed by server", "✗".yellow());
                    break;
                };
                if name == "monitoring-status" {
                    monitored = data["isMonitored"].as_bool().unwrap_or(false);
                    frame_rate = data["frameRate"].as_u64().unwrap_or(1).max(1) as u32;
                    ticker = interval(Duration::from_millis(1000 / frame_rate as u64));
                    if monitored {
                        println!("{} Monitored, streaming at {} fps", "●".red().bold(), frame_rate);
                    } else {
                        println!("{} Not monitored, camera idle", "○".dimmed());
                    }
                } else {
                    println!("{} {} {}", "◀".green(), name.bold(), data);
                }
            }
            _ = ticker.tick() => {
                if !monitored {
                    continue;
                }
                let sent = send_event(
                    &mut write,
                    "frame",
                    json!({
                        "sessionId": session_id,
                        "frameBlob": FAKE_FRAME,
                        "timestamp": chrono::Utc::now().timestamp_millis(),
                    }),
                )
                .await;
                if !sent {
                    println!("{} Failed to send frame", "✗".red());
                    break;
                }
                frames_sent += 1;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    send_event(
        &mut write,
        "leave-proctoring",
        json!({ "sessionId": session_id, "displayName": name }),
    )
    .await;
    let _ = write.close().await;
    println!("{} Left after sending {} frames", "✓".green(), frames_sent);
}

async fn run_observer(server: &str, duration: u64, verbose: bool) {
    println!("{}", "Joining observer room...".cyan());

    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    if !send_event(&mut write, "join-monitoring", Value::Null).await {
        println!("{} Failed to send join-monitoring", "✗".red());
        return;
    }
    println!("{} join-monitoring sent", "✓".green());
    println!("Press {} to disconnect.", "Ctrl+C".bold());

    let mut frames: BTreeMap<String, u64> = BTreeMap::new();
    let stop_at = deadline(duration);

    loop {
        let remaining = match stop_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        };
        if remaining.is_zero() {
            break;
        }

        tokio::select! {
            event = timeout(remaining, next_event(&mut read)) => {
                let Ok(event) = event else { continue };
                let Some((name, data)) = event else {
                    println!("{} Connection closed by server", "✗".yellow());
                    break;
                };
                print_observer_event(&name, &data, verbose, &mut frames);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = write.close().await;
    print_frame_tally(&frames);
}

fn print_observer_event(name: &str, data: &Value, verbose: bool, frames: &mut BTreeMap<String, u64>) {
    match name {
        "active-sessions" => {
            let sessions = data.as_array().map(Vec::len).unwrap_or(0);
            println!("{} {} active sessions", "◀".green(), sessions.to_string().bold());
            if let Some(list) = data.as_array() {
                for session in list {
                    let marker = if session["isMonitored"].as_bool().unwrap_or(false) {
                        "●".red()
                    } else {
                        "○".dimmed()
                    };
                    println!(
                        "    {} {} ({})",
                        marker,
                        session["sessionId"].as_str().unwrap_or("?"),
                        session["displayName"].as_str().unwrap_or("?")
                    );
                }
            }
        }
        "monitoring-config" => {
            println!(
                "{} config: rate {} | {} fps | every {} min | {}/{} monitored",
                "◀".green(),
                data["sampleRate"],
                data["frameRate"],
                data["rotationInterval"],
                data["monitoredCount"],
                data["totalSessions"]
            );
        }
        "monitoring-pool-updated" => {
            println!(
                "{} pool rotated: {}/{} monitored, next at {}",
                "↻".cyan().bold(),
                data["monitoredCount"],
                data["totalSessions"],
                data["nextRotationAt"].as_str().unwrap_or("?")
            );
            println!("    {}", data["monitoredIds"]);
        }
        "student:joined" => {
            println!(
                "{} joined: {} ({})",
                "+".green().bold(),
                data["sessionId"].as_str().unwrap_or("?"),
                data["displayName"].as_str().unwrap_or("?")
            );
        }
        "student:left" => {
            println!(
                "{} left: {}",
                "-".red().bold(),
                data["sessionId"].as_str().unwrap_or("?")
            );
        }
        "frame" => {
            let session_id = data["sessionId"].as_str().unwrap_or("?").to_string();
            if verbose {
                println!(
                    "{} frame from {} @ {}",
                    "▣".blue(),
                    session_id,
                    data["timestamp"]
                );
            }
            *frames.entry(session_id).or_default() += 1;
        }
        other => {
            println!("{} {} {}", "◀".green(), other.bold(), data);
        }
    }
}

fn print_frame_tally(frames: &BTreeMap<String, u64>) {
    println!("\n{}", "Frames received".bold());
    println!("{}", "─".repeat(40));
    if frames.is_empty() {
        println!("  (none)");
        return;
    }
    for (session_id, count) in frames {
        println!("  {:<24} {}", session_id, count);
    }
}

async fn request_refresh(server: &str) {
    println!("{}", "Requesting pool refresh...".cyan());

    let Some((mut write, mut read)) = connect(server).await else {
        return;
    };

    if !send_event(&mut write, "join-monitoring", Value::Null).await
        || !send_event(&mut write, "refresh-monitoring", Value::Null).await
    {
        println!("{} Failed to send refresh request", "✗".red());
        return;
    }

    let waited = timeout(Duration::from_secs(5), async {
        while let Some((name, data)) = next_event(&mut read).await {
            if name == "monitoring-pool-updated" {
                return Some(data);
            }
        }
        None
    })
    .await;

    match waited {
        Ok(Some(data)) => {
            println!(
                "{} Pool refreshed: {}/{} monitored",
                "✓".green(),
                data["monitoredCount"],
                data["totalSessions"]
            );
            println!("  Monitored: {}", data["monitoredIds"]);
        }
        Ok(None) => println!("{} Connection closed before the pool was updated", "✗".red()),
        Err(_) => println!(
            "{} No pool update within 5s (no exam-takers connected?)",
            "✗".yellow()
        ),
    }
    let _ = write.close().await;
}

async fn simulate(server: &str, students: usize, duration: u64) {
    println!("\n{}", "Simulating exam".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("  Exam-takers: {}", students);
    println!("  Duration: {}s", duration);

    let Some((mut observer_write, mut observer_read)) = connect(server).await else {
        return;
    };
    if !send_event(&mut observer_write, "join-monitoring", Value::Null).await {
        println!("{} Observer failed to join", "✗".red());
        return;
    }

    let mut tasks = Vec::with_capacity(students);
    for i in 1..=students {
        let server = server.to_string();
        tasks.push(tokio::spawn(async move {
            simulated_student(&server, &format!("sim-{:03}", i), duration).await
        }));
        sleep(Duration::from_millis(20)).await;
    }
    println!("{} {} exam-takers connected", "✓".green(), students);

    let mut frames: BTreeMap<String, u64> = BTreeMap::new();
    let mut rotations = 0u32;
    let mut last_pool = Value::Null;
    let stop_at = Instant::now() + Duration::from_secs(duration);

    loop {
        let remaining = stop_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, next_event(&mut observer_read)).await {
            Ok(Some((name, data))) => match name.as_str() {
                "frame" => {
                    let session_id = data["sessionId"].as_str().unwrap_or("?").to_string();
                    *frames.entry(session_id).or_default() += 1;
                }
                "monitoring-pool-updated" => {
                    rotations += 1;
                    last_pool = data;
                }
                _ => {}
            },
            Ok(None) => {
                println!("{} Observer connection closed", "✗".red());
                break;
            }
            Err(_) => break,
        }
    }

    let mut sent = 0u64;
    for task in tasks {
        if let Ok(count) = task.await {
            sent += count;
        }
    }
    let _ = observer_write.close().await;

    let received: u64 = frames.values().sum();
    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Simulation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  Pool updates seen: {}", rotations);
    println!(
        "  Last pool: {}/{} monitored (sample rate {})",
        last_pool["monitoredCount"], last_pool["totalSessions"], last_pool["sampleRate"]
    );
    println!("  Sessions streamed: {}/{}", frames.len(), students);
    println!("  Frames sent: {}", sent);
    println!("  Frames received: {}", received);
    print_frame_tally(&frames);
}

/// Joins, streams only while monitored, then leaves. Returns frames sent.
async fn simulated_student(server: &str, session_id: &str, duration: u64) -> u64 {
    let url = format!("ws://{}/proctoring", server);
    let Ok((ws_stream, _)) = connect_async(&url).await else {
        return 0;
    };
    let (mut write, mut read) = ws_stream.split();

    let joined = send_event(
        &mut write,
        "join-proctoring",
        json!({
            "sessionId": session_id,
            "displayName": format!("Simulated {}", session_id),
            "testId": 1,
            "testTitle": "Simulation",
        }),
    )
    .await;
    if !joined {
        return 0;
    }

    let mut monitored = false;
    let mut sent = 0u64;
    let mut ticker = interval(Duration::from_millis(500));
    let stop_at = Instant::now() + Duration::from_secs(duration);

    while Instant::now() < stop_at {
        tokio::select! {
            event = next_event(&mut read) => {
                match event {
                    Some((name, data)) if name == "monitoring-status" => {
                        monitored = data["isMonitored"].as_bool().unwrap_or(false);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if monitored {
                    let ok = send_event(
                        &mut write,
                        "frame",
                        json!({
                            "sessionId": session_id,
                            "frameBlob": FAKE_FRAME,
                            "timestamp": chrono::Utc::now().timestamp_millis(),
                        }),
                    )
                    .await;
                    if !ok {
                        break;
                    }
                    sent += 1;
                }
            }
        }
    }

    let _ = write.close().await;
    sent
}
