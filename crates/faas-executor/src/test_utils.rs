/// Test utilities for conditional test execution
use std::process::Command;

pub fn has_docker() -> bool {
    // Check if docker command exists and the daemon answers
    Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub fn has_image(image: &str) -> bool {
    Command::new("docker")
        .args(["image", "inspect", image])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Macro to skip tests when requirements aren't met
#[macro_export]
macro_rules! require_docker {
    () => {
        if !$crate::test_utils::has_docker() {
            eprintln!("Test ignored: Docker not available");
            return;
        }
    };
    ($image:expr) => {
        $crate::require_docker!();
        if !$crate::test_utils::has_image($image) {
            eprintln!("Test ignored: image {} not present locally", $image);
            return;
        }
    };
}
