use std::fmt::Display;
use std::time::Instant;

use console::Style;
use serde::Serialize;

const ANSI_BLUE: Style = Style::new().blue();

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `tsumiki`, this serves two purposes:
/// 1. It keys the cache of optimized images, so that an unchanged image is
///    never compressed twice.
/// 2. It disambiguates sprite symbol identifiers when two icons share a name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Readable output, source maps, live reload, watcher and dev server.
    Development,
    /// Minified output without source maps. Nothing runs after the build.
    Production,
}

impl Mode {
    pub fn is_development(self) -> bool {
        matches!(self, Mode::Development)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run configuration shared by every task.
///
/// The value is constructed once at startup and passed down by reference;
/// nothing in the crate reads the mode from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// The name of the generator.
    pub generator: &'static str,
    /// Whether this is a development or a production run.
    pub mode: Mode,
    /// The port of the live reload WebSocket (if the dev server is running).
    pub reload_port: Option<u16>,
}

impl Environment {
    pub fn new(mode: Mode) -> Self {
        Self {
            generator: "tsumiki",
            mode,
            reload_port: None,
        }
    }

    pub fn with_reload_port(mut self, port: u16) -> Self {
        self.reload_port = Some(port);
        self
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// Only available in development mode with a running reload server. The
    /// script connects to the WebSocket and reloads the page whenever the
    /// server broadcasts a message.
    pub fn get_refresh_script(&self) -> Option<String> {
        if !self.mode.is_development() {
            return None;
        }

        self.reload_port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
            )
        })
    }
}

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}
