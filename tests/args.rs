use std::path::PathBuf;

use argus::{CameraError, FacingMode, MediaDevices};
use argus::args::{Cli, Command};
use clap::Parser;

#[test]
fn navigate_with_image() {
    let cli = Cli::try_parse_from(["argus", "navigate", "--image", "street.jpg"]).unwrap();
    match cli.command {
        Command::Navigate { frame } => {
            assert_eq!(frame.image, Some(PathBuf::from("street.jpg")));
            assert_eq!(frame.facing(), FacingMode::Environment);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn image_and_camera_conflict() {
    let res = Cli::try_parse_from([
        "argus", "navigate", "--image", "a.jpg", "--camera", "b.jpg",
    ]);
    assert!(res.is_err());
}

#[test]
fn read_takes_language() {
    let cli = Cli::try_parse_from(["argus", "read", "--image", "menu.png", "--language", "es"])
        .unwrap();
    assert!(matches!(cli.command, Command::Read { language: Some(ref l), .. } if l == "es"));
}

#[test]
fn defaults_point_at_local_model() {
    let cli = Cli::try_parse_from(["argus", "cameras"]).unwrap();
    assert_eq!(cli.endpoint.model, "llava");
    assert_eq!(cli.endpoint.timeout_secs, 60);
    assert_eq!(cli.voice.player_command(), ["aplay", "-q"]);
    assert_eq!(cli.voice.item_gap_ms, 500);
}

#[test]
fn still_cameras_become_devices() {
    let cli = Cli::try_parse_from([
        "argus",
        "navigate",
        "--camera",
        "back.jpg",
        "--front-camera",
        "front.jpg",
        "--front",
    ])
    .unwrap();
    let Command::Navigate { frame } = cli.command else {
        panic!("expected navigate");
    };
    assert_eq!(frame.facing(), FacingMode::User);
    let _devices = frame.devices();
}

#[tokio::test]
async fn no_camera_flags_means_unsupported() {
    let cli = Cli::try_parse_from(["argus", "navigate"]).unwrap();
    let Command::Navigate { frame } = cli.command else {
        panic!("expected navigate");
    };
    assert_eq!(
        frame.devices().permission().await.unwrap_err(),
        CameraError::Unsupported
    );
}
