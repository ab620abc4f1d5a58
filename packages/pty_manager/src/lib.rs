//! PTY hosting for terminal agents.
//!
//! Spawns one child process under a pseudo-terminal, keeps a rendered
//! [vt100] screen of everything it prints, and exposes the session through a
//! cloneable [`PtyHandle`]. No HTTP and no knowledge of any particular agent.
//!
//! ```no_run
//! use pty_manager::{PtyActor, PtyConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = PtyActor::spawn(PtyConfig {
//!         command: "aider".to_string(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     handle.write_str("hello\r").await.unwrap();
//!     println!("{}", handle.screen_text());
//! }
//! ```

mod error;
pub mod pty;

pub use error::PtyError;
pub use pty::{PtyActor, PtyConfig, PtyHandle, PtyOutput, PtyState};
