//! Clipboard and keyboard access.
//!
//! Neither arboard nor enigo is `Send`, so both are parked on one thread and
//! driven through a channel. Requests are served one at a time, which also
//! keeps clipboard save/paste/restore sequences from interleaving.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use arboard::Clipboard;
use enigo::Direction::{Click, Press, Release};
use enigo::{Enigo, Key, Keyboard};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::ToolError;

/// Delay before the previous clipboard contents are put back.
const RESTORE_DELAY: Duration = Duration::from_millis(100);

enum Request {
    ReadText(oneshot::Sender<Result<String, ToolError>>),
    Paste {
        text: String,
        restore: bool,
        reply: oneshot::Sender<Result<(), ToolError>>,
    },
}

/// Handle to the desktop thread. Cheap to clone.
#[derive(Clone)]
pub struct Desktop {
    sender: mpsc::Sender<Request>,
}

impl Desktop {
    /// Spawns the desktop thread.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("voxagent-desktop".into())
            .spawn(move || run(receiver));
        if let Err(e) = spawned {
            error!("Failed to spawn desktop thread: {}", e);
        }
        Self { sender }
    }

    /// A handle whose thread is already gone. Every request fails.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (sender, _) = mpsc::channel();
        Self { sender }
    }

    pub async fn read_text(&self) -> Result<String, ToolError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::ReadText(reply))?;
        response.await.map_err(|_| ToolError::DesktopGone)?
    }

    /// Puts `text` on the clipboard and presses the paste shortcut. With
    /// `restore`, the previous clipboard text is put back afterwards.
    pub async fn paste(&self, text: &str, restore: bool) -> Result<(), ToolError> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Paste {
            text: text.to_owned(),
            restore,
            reply,
        })?;
        response.await.map_err(|_| ToolError::DesktopGone)?
    }

    fn send(&self, request: Request) -> Result<(), ToolError> {
        self.sender.send(request).map_err(|_| ToolError::DesktopGone)
    }
}

fn run(receiver: mpsc::Receiver<Request>) {
    let mut clipboard = match Clipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(e) => {
            warn!("Clipboard unavailable: {}", e);
            None
        }
    };
    let mut enigo = match Enigo::new(&enigo::Settings::default()) {
        Ok(enigo) => Some(enigo),
        Err(e) => {
            warn!("Keyboard injection unavailable: {}", e);
            None
        }
    };

    while let Ok(request) = receiver.recv() {
        match request {
            Request::ReadText(reply) => {
                let result = clipboard
                    .as_mut()
                    .ok_or_else(|| ToolError::Clipboard("clipboard unavailable".into()))
                    .and_then(|c| c.get_text().map_err(|e| ToolError::Clipboard(e.to_string())));
                let _ = reply.send(result);
            }
            Request::Paste {
                text,
                restore,
                reply,
            } => {
                let previous = paste(clipboard.as_mut(), enigo.as_mut(), &text, restore);
                match previous {
                    Ok(previous) => {
                        let _ = reply.send(Ok(()));
                        if let (Some(previous), Some(clipboard)) = (previous, clipboard.as_mut()) {
                            thread::sleep(RESTORE_DELAY);
                            if let Err(e) = clipboard.set_text(previous) {
                                warn!("Failed to restore clipboard text: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }
    debug!("Desktop thread exiting");
}

/// Returns the clipboard text to restore, if any.
fn paste(
    clipboard: Option<&mut Clipboard>,
    enigo: Option<&mut Enigo>,
    text: &str,
    restore: bool,
) -> Result<Option<String>, ToolError> {
    let clipboard = clipboard.ok_or_else(|| ToolError::Clipboard("clipboard unavailable".into()))?;
    let enigo = enigo.ok_or_else(|| ToolError::Keyboard("keyboard unavailable".into()))?;

    let previous = if restore {
        match clipboard.get_text() {
            Ok(previous) => Some(previous),
            Err(e) => {
                debug!("Nothing to restore from clipboard: {}", e);
                None
            }
        }
    } else {
        None
    };

    clipboard
        .set_text(text)
        .map_err(|e| ToolError::Clipboard(e.to_string()))?;
    press_paste(enigo).map_err(|e| ToolError::Keyboard(e.to_string()))?;

    Ok(previous)
}

fn press_paste(enigo: &mut Enigo) -> Result<(), enigo::InputError> {
    #[cfg(target_os = "macos")]
    let paste_modifier = Key::Meta;
    #[cfg(not(target_os = "macos"))]
    let paste_modifier = Key::Control;

    enigo.key(paste_modifier, Press)?;
    enigo.key(Key::Unicode('v'), Click)?;
    enigo.key(paste_modifier, Release)?;

    Ok(())
}
