pub type GekiResult<T> = Result<T, GekiError>;

#[derive(thiserror::Error, Debug)]
pub enum GekiError {
    /// A required input asset (background video, sound effect) is absent.
    ///
    /// Reported before any synthesis or decoding starts; distinct from a
    /// failure during rendering.
    #[error("missing asset: {path}")]
    MissingAsset { path: std::path::PathBuf },

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("font load error: {0}")]
    FontLoad(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GekiError {
    pub fn missing_asset(path: impl Into<std::path::PathBuf>) -> Self {
        Self::MissingAsset { path: path.into() }
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn font_load(msg: impl Into<String>) -> Self {
        Self::FontLoad(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            GekiError::missing_asset("bg.mp4")
                .to_string()
                .contains("missing asset:")
        );
        assert!(
            GekiError::synthesis("x")
                .to_string()
                .contains("speech synthesis error:")
        );
        assert!(GekiError::render("x").to_string().contains("render error:"));
        assert!(
            GekiError::font_load("x")
                .to_string()
                .contains("font load error:")
        );
        assert!(
            GekiError::validation("x")
                .to_string()
                .contains("validation error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = GekiError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
