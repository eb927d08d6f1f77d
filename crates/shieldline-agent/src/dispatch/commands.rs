use dashmap::DashMap;

use shieldline_core::error::{Result, ShieldError};

use crate::host::{FrameTarget, Hosts};

pub const ENTER_ZAPPER_MODE: &str = "enter-zapper-mode";
pub const ENTER_PICKER_MODE: &str = "enter-picker-mode";

/// Keyboard commands, each injecting a fixed script bundle into a tab.
pub struct CommandTable {
    bundles: DashMap<&'static str, &'static [&'static str]>,
}

impl Default for CommandTable {
    fn default() -> Self {
        let bundles: DashMap<&'static str, &'static [&'static str]> = DashMap::new();
        bundles.insert(
            ENTER_ZAPPER_MODE,
            &["/js/scripting/tool-overlay.js", "/js/scripting/zapper.js"],
        );
        bundles.insert(
            ENTER_PICKER_MODE,
            &[
                "/js/scripting/css-procedural-api.js",
                "/js/scripting/tool-overlay.js",
                "/js/scripting/picker.js",
            ],
        );
        Self { bundles }
    }
}

impl CommandTable {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.bundles.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    pub fn bundle(&self, command: &str) -> Option<&'static [&'static str]> {
        self.bundles.get(command).map(|e| *e.value())
    }

    /// Inject the bundle of `command` into the top frame of `tab_id`.
    pub async fn run(&self, hosts: &Hosts, command: &str, tab_id: i64) -> Result<()> {
        let files = self
            .bundle(command)
            .ok_or_else(|| ShieldError::BadRequest(format!("unknown command: {command}")))?;
        let target = FrameTarget {
            tab_id,
            frame_id: None,
        };
        hosts.scripting.execute_script(target, files).await
    }
}
