//! Drivers against simulated instruments on a loopback TCP socket.
//!
//! Each simulator answers line-by-line the way the real instrument does and
//! splits replies across two writes so the adapter has to reassemble frames.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lab_instruments::config::Settings;
use lab_instruments::parameter::ParamValue;
use lab_instruments::registry::{open_instrument, InstrumentRegistry};
use lab_instruments::Driver;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

type Log = Arc<Mutex<Vec<String>>>;

/// Serve one client; `handler` maps a received line to an optional reply.
async fn spawn_simulator<F>(terminator: &'static str, handler: F) -> (u16, Log)
where
    F: FnMut(&str) -> Option<String> + Send + 'static,
{
    spawn_slow_simulator(terminator, handler, None).await
}

/// Like [`spawn_simulator`], but the reply to `slow.0` is held back for `slow.1`.
async fn spawn_slow_simulator<F>(
    terminator: &'static str,
    mut handler: F,
    slow: Option<(&'static str, Duration)>,
) -> (u16, Log)
where
    F: FnMut(&str) -> Option<String> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log: Log = Arc::default();
    let received = log.clone();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            received.lock().unwrap().push(line.clone());
            if let Some((command, delay)) = slow {
                if line == command {
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some(reply) = handler(&line) {
                let frame = format!("{}{}", reply, terminator);
                let (head, tail) = frame.split_at(frame.len() / 2);
                writer.write_all(head.as_bytes()).await.unwrap();
                writer.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                writer.write_all(tail.as_bytes()).await.unwrap();
            }
        }
    });

    (port, log)
}

/// N5183B: `*IDN?`, CW frequency and power. Other commands are only logged.
fn signal_generator() -> impl FnMut(&str) -> Option<String> + Send + 'static {
    let mut frequency = 1.0e9_f64;
    let mut power = -20.0_f64;

    move |line| {
        if line == "*IDN?" {
            return Some("Agilent Technologies,N5183B,MY53050123,B.01.80".to_string());
        }
        if line == ":FREQuency:CW?" {
            return Some(format!("{:E}", frequency));
        }
        if line == ":POW?" {
            return Some(format!("{:+E}", power));
        }
        if let Some(value) = line.strip_prefix(":FREQuency:CW ") {
            frequency = value.trim_end_matches(" Hz").parse().unwrap();
        } else if let Some(value) = line.strip_prefix(":POW ") {
            power = value.parse().unwrap();
        }
        None
    }
}

/// 7651 in current mode: `OD`, `OC`, `S...E` and `O0E`/`O1E`.
fn current_source() -> impl FnMut(&str) -> Option<String> + Send + 'static {
    let mut current = 0.0_f64;
    let mut output = false;

    move |line| match line {
        "OD" => Some(format!("NDCA{:+.4E}", current)),
        "OC" => Some(format!("STS1={}", if output { 16 } else { 0 })),
        "O1E" | "O0E" => {
            output = line == "O1E";
            None
        }
        _ => {
            if let Some(value) = line.strip_prefix('S').and_then(|s| s.strip_suffix('E')) {
                current = value.parse().unwrap();
            }
            None
        }
    }
}

fn tcp_config(id: &str, driver: &str, port: u16) -> String {
    format!(
        r#"
        [timeouts]
        connect_ms = 1000
        reply_ms = 1000

        [[instruments]]
        id = "{}"
        driver = "{}"
        transport = {{ type = "tcp", host = "127.0.0.1", port = {} }}
        "#,
        id, driver, port
    )
}

#[tokio::test]
async fn test_signal_generator_over_tcp() {
    let (port, log) = spawn_simulator("\n", signal_generator()).await;
    let settings = Settings::from_toml_str(&tcp_config("lo", "agilent_n5183b", port)).unwrap();
    let sg = open_instrument(&settings.instruments[0], &settings.timeouts)
        .await
        .unwrap();

    assert_eq!(sg.model(), "N5183B");
    assert_eq!(sg.get("frequency").await.unwrap(), ParamValue::Float(1.0e9));

    sg.set("frequency", ParamValue::Float(6.5e9)).await.unwrap();
    sg.set("power", ParamValue::Int(-5)).await.unwrap();
    sg.call("rf_on", &[]).await.unwrap();

    assert_eq!(sg.get("frequency").await.unwrap(), ParamValue::Float(6.5e9));
    assert_eq!(sg.get("power").await.unwrap(), ParamValue::Float(-5.0));

    let sent = log.lock().unwrap().clone();
    assert_eq!(sent[0], "*IDN?");
    assert!(sent.contains(&":FREQuency:CW 6500000000.000000 Hz".to_string()));
    assert!(sent.contains(&":POW -5.000000".to_string()));
    assert!(sent.contains(&"OUTP ON".to_string()));
}

#[tokio::test]
async fn test_current_source_over_tcp() {
    let (port, log) = spawn_simulator("\r\n", current_source()).await;
    let settings = Settings::from_toml_str(&tcp_config("yoko", "yokogawa_7651", port)).unwrap();
    let registry = InstrumentRegistry::open_all(&settings).await.unwrap();
    let yoko = registry.require("yoko").unwrap();

    assert_eq!(yoko.get("output").await.unwrap(), ParamValue::from("off"));
    yoko.set("current", ParamValue::Float(2.5e-3)).await.unwrap();
    yoko.call("on", &[]).await.unwrap();

    assert_eq!(yoko.get("output").await.unwrap(), ParamValue::from("on"));
    let current = yoko.get("current").await.unwrap().as_f64().unwrap();
    assert!((current - 2.5e-3).abs() < 1e-12);

    let snapshot = yoko.snapshot().await.unwrap();
    assert!(snapshot.errors.is_empty());
    assert_eq!(snapshot.values.len(), 2);

    assert!(log.lock().unwrap().contains(&"S2.500000e-03E".to_string()));
}

#[tokio::test]
async fn test_raw_ask_over_tcp() {
    let (port, _log) = spawn_simulator("\n", signal_generator()).await;
    let settings = Settings::from_toml_str(&tcp_config("lo", "agilent_n5183b", port)).unwrap();
    let sg = open_instrument(&settings.instruments[0], &settings.timeouts)
        .await
        .unwrap();

    let idn = sg.connection().ask("*IDN?").await.unwrap();
    assert!(idn.starts_with("Agilent Technologies,N5183B"));
    assert!(sg.connection().adapter_info().await.contains("127.0.0.1"));
}

#[tokio::test]
async fn test_late_reply_does_not_shift_later_queries() {
    let (port, _log) = spawn_slow_simulator(
        "\n",
        signal_generator(),
        Some((":FREQuency:CW?", Duration::from_millis(150))),
    )
    .await;
    let mut settings =
        Settings::from_toml_str(&tcp_config("lo", "agilent_n5183b", port)).unwrap();
    settings.instruments[0].timeout_ms = Some(50);
    let sg = open_instrument(&settings.instruments[0], &settings.timeouts)
        .await
        .unwrap();

    assert!(sg.get("frequency").await.is_err());
    assert!(sg.connection().is_out_of_sync());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(sg.get("power").await.unwrap(), ParamValue::Float(-20.0));
    assert_eq!(sg.get("power").await.unwrap(), ParamValue::Float(-20.0));
    assert!(!sg.connection().is_out_of_sync());
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind and drop to get a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let settings = Settings::from_toml_str(&tcp_config("lo", "agilent_n5183b", port)).unwrap();
    assert!(open_instrument(&settings.instruments[0], &settings.timeouts)
        .await
        .is_err());
}
