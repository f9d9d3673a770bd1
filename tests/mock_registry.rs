//! Opening a whole rack from configuration with scripted (mock) transports.

use lab_instruments::config::Settings;
use lab_instruments::parameter::ParamValue;
use lab_instruments::registry::InstrumentRegistry;
use lab_instruments::{Driver, DriverError};

const RACK: &str = r#"
[timeouts]
reply_ms = 100

[[instruments]]
id = "lo"
driver = "agilent_n5183b"
[instruments.transport]
type = "mock"
replies = { "*IDN?" = "Agilent Technologies,N5183B,MY53050123,B.01.80", ":FREQuency:CW?" = "+6.000000000000E+09", ":POW?" = "-1.00000000E+001" }

[[instruments]]
id = "magnet"
driver = "cryomagnetics_4g"
[instruments.transport]
type = "mock"
replies = { "IMAG?" = "12.5kG", "SWEEP?" = "Pause", "LLIM?" = "0.0000kG", "ULIM?" = "50.0000kG", "UNITS?" = "G", "RATE? 0" = "0.0100", "PSHTR?" = "1" }
[instruments.config.cryomagnetics]
axes = ["Z"]

[[instruments]]
id = "dac"
driver = "unibasel_sp927"
[instruments.transport]
type = "mock"
replies = { "1 V?" = "7FFF80" }

[[instruments]]
id = "yoko"
driver = "yokogawa_7651"
[instruments.transport]
type = "mock"
replies = { "OC" = "STS1=16", "OD" = "NDCA+1.0000E-03" }

[[instruments]]
id = "fsw"
driver = "rohde_schwarz_fsw"
enabled = false
transport = { type = "mock" }
"#;

async fn rack() -> InstrumentRegistry {
    let settings = Settings::from_toml_str(RACK).unwrap();
    InstrumentRegistry::open_all(&settings).await.unwrap()
}

fn float(value: &ParamValue) -> f64 {
    value.as_f64().unwrap()
}

#[tokio::test]
async fn test_open_all_skips_disabled() {
    let registry = rack().await;
    assert_eq!(registry.len(), 4);
    assert_eq!(
        registry.ids().collect::<Vec<_>>(),
        vec!["dac", "lo", "magnet", "yoko"]
    );
    assert!(registry.get("fsw").is_none());
    assert!(matches!(
        registry.require("fsw"),
        Err(DriverError::InvalidArgument(_))
    ));

    assert_eq!(registry.require("lo").unwrap().model(), "N5183B");
    assert_eq!(registry.require("magnet").unwrap().model(), "4G");
}

#[tokio::test]
async fn test_signal_generator_snapshot() {
    let registry = rack().await;
    let snapshot = registry.require("lo").unwrap().snapshot().await.unwrap();

    assert_eq!(snapshot.instrument, "lo");
    assert!(snapshot.errors.is_empty());
    assert_eq!(snapshot.values["frequency"], ParamValue::Float(6.0e9));
    assert_eq!(snapshot.values["power"], ParamValue::Float(-10.0));
}

#[tokio::test]
async fn test_magnet_snapshot_records_failures() {
    let registry = rack().await;
    let magnet = registry.require("magnet").unwrap();
    let snapshot = magnet.snapshot().await.unwrap();

    assert!((float(&snapshot.values["z_field"]) - 1.25).abs() < 1e-12);
    assert_eq!(snapshot.values["z_sweep"], ParamValue::from("Pause"));
    assert_eq!(snapshot.values["z_uplim"], ParamValue::Float(50.0));
    assert_eq!(snapshot.values["z_units"], ParamValue::from("G"));
    assert_eq!(snapshot.values["z_heater"], ParamValue::Bool(true));

    // No reply is scripted for RATE? 1.
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.errors.contains_key("z_rate1"));
    assert!(!snapshot.values.contains_key("z_rate1"));

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["instrument"], "magnet");
    assert_eq!(json["values"]["z_sweep"], "Pause");
}

#[tokio::test]
async fn test_magnet_functions() {
    let registry = rack().await;
    let magnet = registry.require("magnet").unwrap();

    magnet
        .call("sweep_up", &[ParamValue::from("Z"), ParamValue::Bool(false)])
        .await
        .unwrap();
    magnet.call("pause_all", &[]).await.unwrap();

    assert!(matches!(
        magnet.call("sweep_up", &[ParamValue::from("Z")]).await,
        Err(DriverError::InvalidArgument(_))
    ));
    assert!(matches!(
        magnet.set("z_sweep", ParamValue::from("SIDEWAYS")).await,
        Err(DriverError::Validation { .. })
    ));
    assert!(matches!(
        magnet.get("x_field").await,
        Err(DriverError::UnknownParameter { .. })
    ));
}

#[tokio::test]
async fn test_dac_range_and_channels() {
    let registry = rack().await;
    let dac = registry.require("dac").unwrap();

    assert_eq!(dac.get("ch1_volt").await.unwrap(), ParamValue::Float(0.0));
    assert!(matches!(
        dac.set("ch1_volt", ParamValue::Float(10.0)).await,
        Err(DriverError::Validation { .. })
    ));

    let snapshot = dac.snapshot().await.unwrap();
    assert_eq!(snapshot.values.len(), 1);
    assert_eq!(snapshot.errors.len(), 7);
}

#[tokio::test]
async fn test_current_source() {
    let registry = rack().await;
    let yoko = registry.require("yoko").unwrap();

    assert_eq!(yoko.get("output").await.unwrap(), ParamValue::from("on"));
    assert_eq!(yoko.get("current").await.unwrap(), ParamValue::Float(1.0e-3));
    yoko.set("current", ParamValue::Float(-2.0e-3)).await.unwrap();
    yoko.call("off", &[]).await.unwrap();
    assert!(matches!(
        yoko.call("blink", &[]).await,
        Err(DriverError::UnknownFunction { .. })
    ));
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let settings = Settings::from_toml_str(
        r#"
        [timeouts]
        reply_ms = 50

        [[instruments]]
        id = "silent"
        driver = "agilent_n5183b"
        transport = { type = "mock" }
        "#,
    )
    .unwrap();

    assert!(InstrumentRegistry::open_all(&settings).await.is_err());
}
