use log::Log;
use log::{Level, LevelFilter};
use log::{Metadata, Record};

struct Logger;

impl Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true // 级别由 max_level 过滤
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        use Level::*;
        let color = match record.level() {
            Error => 31,
            Warn => 93,
            Info => 34,
            Debug => 32,
            Trace => 90,
        };

        // 日志走 stderr, 不会混进 cat 等命令的输出
        eprintln!(
            "\u{1B}[{}m[{:<5}] [{}] {}\u{1B}[0m",
            color,
            record.level(),
            std::thread::current().name().unwrap_or("-"),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// 安装日志器; 没有指定级别时读取环境变量 LOG, 都没有则关闭日志
pub fn init(level: Option<LevelFilter>) {
    static LOGGER: Logger = Logger;
    // 重复安装 (比如多个测试) 时保留第一个
    let _ = log::set_logger(&LOGGER);

    let level = level
        .or_else(|| std::env::var("LOG").ok().and_then(|s| s.parse().ok()))
        .unwrap_or(LevelFilter::Off);
    log::set_max_level(level);
}
