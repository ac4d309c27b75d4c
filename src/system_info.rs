use crate::config::Config;
use serde::Serialize;
use sysinfo::System;

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub cpus: usize,
    pub cpu_model: String,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
    pub memory_used_gb: f64,
}

pub fn get_system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_all();

    let memory_total = system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0;
    let memory_free = system.free_memory() as f64 / 1024.0 / 1024.0 / 1024.0;

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    SystemInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpus: system.cpus().len(),
        cpu_model,
        memory_total_gb: memory_total,
        memory_free_gb: memory_free,
        memory_used_gb: memory_total - memory_free,
    }
}

/// `decoder` is the ffmpeg version line, or `None` when previews fall back
/// to placeholders.
pub fn print_startup_info(config: &Config, decoder: Option<&str>) {
    let sys_info = get_system_info();

    println!("{}", "=".repeat(60));
    println!("🎬 VidSphere server v{}", sys_info.version);
    println!("{}", "=".repeat(60));
    println!("📊 System Information:");
    println!("  Platform: {} ({})", sys_info.platform, sys_info.arch);
    println!("  CPUs: {} ({})", sys_info.cpus, sys_info.cpu_model);
    println!(
        "  Memory: {:.2} GB total, {:.2} GB free, {:.2} GB used",
        sys_info.memory_total_gb, sys_info.memory_free_gb, sys_info.memory_used_gb
    );
    println!(
        "  Decoder: {}",
        decoder.unwrap_or("not available (placeholder previews only)")
    );
    println!("  Video Dir: {:?}", config.video_dir);
    println!("  Thumbnail Dir: {:?}", config.thumbnail_dir);
    println!(
        "  Thumbnails: {}x{} JPEG q{}, {} concurrent",
        config.thumbnail_size.width,
        config.thumbnail_size.height,
        config.thumbnail_quality,
        config.max_concurrent_thumbnails
    );
    println!("{}", "=".repeat(60));
    println!("✅ Server running on http://0.0.0.0:{}", config.port);
    println!("✅ Server accessible at http://localhost:{}", config.port);
    println!("\nAvailable endpoints:");
    println!("  POST /upload              - upload a video (field \"video\")");
    println!("  GET  /videos              - list videos");
    println!("  GET  /video/<name>        - play a video");
    println!("  GET  /download/<name>     - download a video");
    println!("  GET  /preview/<name>      - video thumbnail");
    println!("  POST /thumbnail/<name>    - generate a thumbnail");
    println!("  GET  /monitor             - connection monitor");
    println!("  GET  /api/monitor         - monitor data (JSON)");
    println!("{}", "=".repeat(60));
}
