use crate::core::TaskStatus;

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 文本进度条，例如 `[#####-----]`
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    let filled = (fraction * width as f64).round() as usize;

    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

pub fn format_status(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Pending => "waiting".to_string(),
        TaskStatus::Uploading { progress } => format!("{} {:>3.0}%", progress_bar(*progress, 20), progress * 100.0),
        TaskStatus::Completed => "done".to_string(),
        TaskStatus::Failed { message } => format!("failed: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0, 4), "[----]");
        assert_eq!(progress_bar(0.5, 4), "[##--]");
        assert_eq!(progress_bar(2.0, 4), "[####]");
    }

    #[test]
    fn test_format_status() {
        assert_eq!(format_status(&TaskStatus::failed("not authenticated")), "failed: not authenticated");
        assert!(format_status(&TaskStatus::uploading(0.35)).ends_with(" 35%"));
    }
}
