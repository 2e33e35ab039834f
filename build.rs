use std::fs;
use std::path::Path;

const DEVICE_CONFIG: &str = "device_config.h";

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");

    println!("cargo:rerun-if-changed={}", DEVICE_CONFIG);
    println!("cargo:rerun-if-env-changed=FIRMWARE_UPGRADE_URL");

    let contents = if Path::new(DEVICE_CONFIG).exists() {
        fs::read_to_string(DEVICE_CONFIG)?
    } else {
        println!("cargo:warning={} not found! Copy device_config.h.example to {} and add your credentials.", DEVICE_CONFIG, DEVICE_CONFIG);
        String::new()
    };

    println!("cargo:rustc-env=WIFI_SSID={}", define(&contents, "WIFI_SSID").unwrap_or_default());
    println!("cargo:rustc-env=WIFI_PASSWORD={}", define(&contents, "WIFI_PASSWORD").unwrap_or_default());

    // The environment wins over the header so CI can point at a staging server
    let url = std::env::var("FIRMWARE_UPGRADE_URL")
        .ok()
        .or_else(|| define(&contents, "FIRMWARE_UPGRADE_URL"))
        .unwrap_or_default();
    if url.is_empty() {
        println!("cargo:warning=FIRMWARE_UPGRADE_URL is not set, updates stay disabled until it is stored in NVS");
    }
    println!("cargo:rustc-env=FIRMWARE_UPGRADE_URL={}", url);

    Ok(())
}

/// Value of `#define NAME "value"`
fn define(contents: &str, name: &str) -> Option<String> {
    contents
        .lines()
        .find(|l| {
            let mut parts = l.split_whitespace();
            parts.next() == Some("#define") && parts.next() == Some(name)
        })
        .and_then(|l| l.split('"').nth(1))
        .map(str::to_string)
}
