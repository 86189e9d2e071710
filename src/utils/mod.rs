//! 实用工具模块
//!
//! 命令行输出用的格式化函数

const HASHRATE_UNITS: [&str; 6] = ["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s"];

/// 格式化算力显示（智能单位自适应）
///
/// 显示值保持在 1-999 之间，精度随数值大小递减。
///
/// ```
/// use cgminer_dashboard::utils::format_hashrate;
///
/// assert_eq!(format_hashrate(1234.0), "1.234 KH/s");
/// assert_eq!(format_hashrate(1234567890.0), "1.235 GH/s");
/// ```
pub fn format_hashrate(hashrate: f64) -> String {
    if !hashrate.is_finite() || hashrate <= 0.0 {
        return "0.00 H/s".to_string();
    }

    let mut value = hashrate;
    let mut unit = 0;
    while value >= 1000.0 && unit < HASHRATE_UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{:.2} {}", value, HASHRATE_UNITS[0]);
    }

    let precision = if value >= 100.0 {
        1
    } else if value >= 10.0 {
        2
    } else {
        3
    };
    format!("{:.*} {}", precision, value, HASHRATE_UNITS[unit])
}

/// 运行时长，如 `2d 03:04:05`
pub fn format_uptime(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    }
}
