use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use crate::context::PlayerConfig;
use crate::error::SortError;

/// Hands a video to something that can play it. Fire-and-forget.
pub trait PlayerLauncher {
    fn launch(&self, video: &Path) -> Result<(), SortError>;
}

/// Launches the configured player, or the system's default application.
pub struct CommandLauncher {
    player: Option<(String, Vec<String>)>,
}

impl CommandLauncher {
    pub fn new(config: &PlayerConfig) -> Self {
        let player = match &config.command {
            Some(cmd) if !cmd.trim().is_empty() => Some((cmd.clone(), config.args.clone())),
            _ => None,
        };
        Self { player }
    }

    fn command(program: &str, args: &[String], video: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(video)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn spawn_player(program: &str, args: &[String], video: &Path) -> Result<(), SortError> {
        let mut child = Self::command(program, args, video).spawn().map_err(|e| SortError::Launch {
            path: video.to_path_buf(),
            reason: format!("{}: {}", program, e),
        })?;
        log::info!("Launched {} (pid {}) for {:?}", program, child.id(), video);

        // Reap the player when it exits so it does not linger as a zombie.
        let reaper = thread::Builder::new().name("player-reaper".into()).spawn(move || {
            if let Err(e) = child.wait() {
                log::debug!("waiting on player: {}", e);
            }
        });
        if let Err(e) = reaper {
            log::warn!("Could not spawn player reaper: {}", e);
        }
        Ok(())
    }
}

impl PlayerLauncher for CommandLauncher {
    fn launch(&self, video: &Path) -> Result<(), SortError> {
        match &self.player {
            Some((program, args)) => Self::spawn_player(program, args, video),
            None => {
                open::that_detached(video).map_err(|e| SortError::Launch {
                    path: video.to_path_buf(),
                    reason: format!("default application: {}", e),
                })?;
                log::info!("Opened {:?} with the default application", video);
                Ok(())
            }
        }
    }
}
