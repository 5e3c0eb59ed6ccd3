use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use weld_inspect::config::InspectConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WELD_CONFIG",
        "WELD_BACKEND",
        "WELD_MODEL_PATH",
        "WELD_CONFIDENCE",
        "WELD_MAX_DETECTIONS",
        "WELD_IOU",
        "WELD_FRAME_INTERVAL_MS",
        "WELD_CLASS_NAMES",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = InspectConfig::load().expect("load config");

    assert_eq!(cfg.model.backend, "tract");
    assert_eq!(cfg.model.path, PathBuf::from("models/best.onnx"));
    assert_eq!(cfg.model.input_size, 640);
    assert_eq!(cfg.detection.confidence, 0.25);
    assert_eq!(cfg.detection.max_detections, 1000);
    assert_eq!(cfg.frame_interval, Duration::from_millis(30));
    assert_eq!(cfg.max_consecutive_failures, 5);
    assert_eq!(cfg.source.frame_limit, 100);
    assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "model": {
                "backend": "stub",
                "path": "models/seam_v2.onnx",
                "input_size": 320,
                "class_names": ["crack", "porosity", "lack_of_fusion", "spatter"]
            },
            "detection": { "confidence": 0.4, "max_detections": 50, "iou": 0.5 },
            "session": { "frame_interval_ms": 10, "max_consecutive_failures": 3 },
            "source": { "frame_limit": 12, "width": 320, "height": 240, "target_fps": 15 }
        }"#,
    );

    std::env::set_var("WELD_CONFIG", file.path());
    std::env::set_var("WELD_CONFIDENCE", "0.6");
    std::env::set_var("WELD_CLASS_NAMES", "crack, porosity");

    let cfg = InspectConfig::load().expect("load config");

    assert_eq!(cfg.model.backend, "stub");
    assert_eq!(cfg.model.path, PathBuf::from("models/seam_v2.onnx"));
    assert_eq!(cfg.model.input_size, 320);
    assert_eq!(cfg.model.class_names, vec!["crack", "porosity"]);
    assert_eq!(cfg.detection.confidence, 0.6);
    assert_eq!(cfg.detection.max_detections, 50);
    assert_eq!(cfg.detection.iou, 0.5);
    assert_eq!(cfg.frame_interval, Duration::from_millis(10));
    assert_eq!(cfg.max_consecutive_failures, 3);
    assert_eq!(cfg.source.frame_limit, 12);
    assert_eq!(cfg.source.target_fps, 15);

    let session = cfg.session_config();
    assert_eq!(session.params.max_detections, 50);
    assert_eq!(session.frame_interval, Duration::from_millis(10));

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".toml",
        r#"
[model]
backend = "stub"

[detection]
confidence = 0.3

[source]
width = 160
height = 120
"#,
    );
    std::env::set_var("WELD_CONFIG", file.path());
    std::env::set_var("WELD_FRAME_INTERVAL_MS", "0");

    let cfg = InspectConfig::load().expect("load config");

    assert_eq!(cfg.model.backend, "stub");
    assert_eq!(cfg.detection.confidence, 0.3);
    assert_eq!(cfg.detection.max_detections, 1000);
    assert_eq!((cfg.source.width, cfg.source.height), (160, 120));
    assert_eq!(cfg.frame_interval, Duration::ZERO);

    clear_env();
}

#[test]
fn invalid_env_number_names_the_variable() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("WELD_MAX_DETECTIONS", "lots");
    let err = InspectConfig::load().unwrap_err();
    assert!(err.to_string().contains("WELD_MAX_DETECTIONS"));

    clear_env();
}

#[test]
fn out_of_range_confidence_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("WELD_CONFIDENCE", "1.5");
    assert!(InspectConfig::load().is_err());

    clear_env();
}

#[test]
fn unknown_file_keys_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(".json", r#"{ "detection": { "threshold": 0.5 } }"#);
    let err = InspectConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("WELD_CONFIG", "/nonexistent/weld_inspect.json");
    let err = InspectConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("failed to read config file"));

    clear_env();
}
