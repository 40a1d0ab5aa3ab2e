//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 tracing subscriber：RUST_LOG 优先，再叠加 directive（默认 info）
pub fn init(directive: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(directive.unwrap_or("info").parse()?);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_is_an_error() {
        assert!(init(Some("beeline=loudest")).is_err());
    }
}
