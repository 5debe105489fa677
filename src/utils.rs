/// WinRT `TimeSpan` 的单位是 100 纳秒。
const TICKS_PER_SECOND: f64 = 10_000_000.0;

/// 把 100 纳秒为单位的时间刻度转换为秒，负值钳制为 0。
pub fn ticks_to_secs(ticks: i64) -> f64 {
    (ticks as f64 / TICKS_PER_SECOND).max(0.0)
}

/// 会话来源 ID 的简短形式，仅用于日志。
///
/// UWP 的 AUMID（`包名_发布者哈希!入口`）只保留包名，其他 ID 原样返回。
pub fn display_name_from_app_id(app_id: &str) -> &str {
    if app_id.is_empty() {
        return "unknown";
    }
    let Some((family, _entry)) = app_id.split_once('!') else {
        return app_id;
    };
    let package = family.split_once('_').map_or(family, |(package, _)| package);
    if package.is_empty() { app_id } else { package }
}
