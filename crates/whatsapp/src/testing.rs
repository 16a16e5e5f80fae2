//! Scripted stand-ins for the browser and the process table.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use wabridge_browser::{BrowserDriver, BrowserHandle, Page, ProcessControl, Signal, WaitOptions};
use wabridge_core::{Error, Paths, Result, WhatsAppConfig, Timings};

use crate::scripts;

#[derive(Default)]
pub struct FakeState {
    pub launches: usize,
    pub launch_fails: bool,
    /// Session -> time its launch takes.
    pub launch_delay: HashMap<String, Duration>,
    pub next_pid: u32,
    pub pages_opened: Vec<String>,
    pub pages_closed: usize,
    pub page_close_fails: bool,
    pub browsers_closed: usize,
    /// Every page interaction, e.g. `click:<sel>`, `type:<text>`, `evaluate:<script>`.
    pub actions: Vec<String>,
    /// Selectors that never match.
    pub missing: HashSet<String>,
    /// Selector -> number of clicks that fail before one succeeds.
    pub click_failures: HashMap<String, u32>,
    /// Selector -> number of `exists` probes that still find it.
    pub vanish_after: HashMap<String, u32>,
    /// Script name -> queued results; the last one repeats.
    pub responses: HashMap<&'static str, VecDeque<Value>>,
}

impl FakeState {
    pub fn count(&self, prefix: &str) -> usize {
        self.actions.iter().filter(|a| a.starts_with(prefix)).count()
    }

    pub fn respond(&mut self, script: &str, values: Vec<Value>) {
        self.responses.insert(script_name(script), values.into());
    }

    pub fn always_fail_click(&mut self, selector: &str) {
        self.click_failures.insert(selector.to_string(), u32::MAX);
    }
}

#[derive(Clone, Default)]
pub struct Fake(Arc<Mutex<FakeState>>);

impl Fake {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.0.lock().unwrap()
    }
}

pub fn script_name(source: &str) -> &'static str {
    match source {
        s if s == scripts::COLLECT_MESSAGES => "collect_messages",
        s if s == scripts::LIST_CHATS => "list_chats",
        s if s == scripts::OPEN_MENU => "open_menu",
        s if s == scripts::CLICK_LABELED => "click_labeled",
        s if s == scripts::SCRAPE_PHONE => "scrape_phone",
        s if s == scripts::SCROLL_COLLECT_NAMES => "scroll_collect_names",
        _ => "unknown",
    }
}

pub struct FakeDriver {
    pub fake: Fake,
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self, session: &str) -> Result<Arc<dyn BrowserHandle>> {
        let delay = self.fake.state().launch_delay.get(session).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.fake.state();
        if state.launch_fails {
            return Err(Error::Launch("no browser binary".into()));
        }
        state.launches += 1;
        state.next_pid += 100;
        let pid = 1000 + state.next_pid;
        Ok(Arc::new(FakeBrowser {
            fake: self.fake.clone(),
            pid,
        }))
    }
}

pub struct FakeBrowser {
    fake: Fake,
    pid: u32,
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn new_page(&self, url: &str) -> Result<Box<dyn Page>> {
        self.fake.state().pages_opened.push(url.to_string());
        Ok(Box::new(FakePage {
            fake: self.fake.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.fake.state().browsers_closed += 1;
        Ok(())
    }
}

pub struct FakePage {
    fake: Fake,
}

impl FakePage {
    fn require(&self, selector: &str) -> Result<()> {
        if self.fake.state().missing.contains(selector) {
            Err(Error::NotReady(format!("no element matches {}", selector)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn wait_for_selector(&self, selector: &str, _options: WaitOptions) -> Result<()> {
        self.require(selector)?;
        self.fake.state().actions.push(format!("wait:{}", selector));
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let mut state = self.fake.state();
        if state.missing.contains(selector) {
            return Ok(false);
        }
        match state.vanish_after.get_mut(selector) {
            Some(0) => Ok(false),
            Some(remaining) => {
                *remaining -= 1;
                Ok(true)
            }
            None => Ok(true),
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.require(selector)?;
        let mut state = self.fake.state();
        state.actions.push(format!("click:{}", selector));
        if let Some(remaining) = state.click_failures.get_mut(selector) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(Error::NotReady(format!("{} not clickable yet", selector)));
            }
        }
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.require(selector)?;
        self.fake.state().actions.push(format!("hover:{}", selector));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.require(selector)?;
        self.fake.state().actions.push(format!("type:{}", text));
        Ok(())
    }

    async fn evaluate(&self, function: &str, _args: Vec<Value>) -> Result<Value> {
        let name = script_name(function);
        let mut state = self.fake.state();
        state.actions.push(format!("evaluate:{}", name));
        let Some(queue) = state.responses.get_mut(name) else {
            return Ok(Value::Null);
        };
        let value = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(value.unwrap_or(Value::Null))
    }

    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>> {
        self.require(selector)?;
        Ok(b"\x89PNG".to_vec())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.fake.state();
        if state.page_close_fails {
            return Err(Error::Driver("target already detached".into()));
        }
        state.pages_closed += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct ProcessState {
    pub dead: HashSet<u32>,
    pub signals: Vec<(u32, Signal)>,
    pub refuse_terminate: bool,
}

#[derive(Clone, Default)]
pub struct FakeProcesses(Arc<Mutex<ProcessState>>);

impl FakeProcesses {
    pub fn state(&self) -> MutexGuard<'_, ProcessState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl ProcessControl for FakeProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        !self.state().dead.contains(&pid)
    }

    async fn child_pids(&self, pid: u32) -> Vec<u32> {
        vec![pid + 1, pid + 2]
    }

    async fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        let mut state = self.state();
        state.signals.push((pid, signal));
        if signal == Signal::Terminate && state.refuse_terminate {
            return Err(Error::Process("operation not permitted".into()));
        }
        state.dead.insert(pid);
        Ok(())
    }
}

/// Everything a domain test needs, rooted in a throwaway directory.
pub struct Harness {
    pub fake: Fake,
    pub processes: FakeProcesses,
    pub paths: Paths,
    pub config: WhatsAppConfig,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = WhatsAppConfig {
            timings: Timings::immediate(),
            ..WhatsAppConfig::default()
        };
        Self {
            fake: Fake::default(),
            processes: FakeProcesses::default(),
            paths: Paths::with_base(dir.path().to_path_buf()),
            config,
            _dir: dir,
        }
    }

    pub fn driver(&self) -> Arc<dyn BrowserDriver> {
        Arc::new(FakeDriver {
            fake: self.fake.clone(),
        })
    }

    pub fn process_control(&self) -> Arc<dyn ProcessControl> {
        Arc::new(self.processes.clone())
    }
}
