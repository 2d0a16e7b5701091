//! In-memory doubles for the gateway and chat platform.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use lodestone_instance::{InstanceGateway, InstanceStatus};

use crate::lifecycle::Interaction;
use crate::presence::ChatSink;

/// Returns scripted statuses in order; the last one repeats forever.
pub struct ScriptedGateway {
    name: String,
    statuses: Mutex<VecDeque<InstanceStatus>>,
    gets: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_get: AtomicBool,
}

impl ScriptedGateway {
    pub fn new(script: impl IntoIterator<Item = InstanceStatus>) -> Self {
        Self {
            name: "minecraft".to_string(),
            statuses: Mutex::new(script.into_iter().collect()),
            gets: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            fail_get: AtomicBool::new(false),
        }
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl InstanceGateway for ScriptedGateway {
    fn instance_name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self) -> anyhow::Result<InstanceStatus> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            anyhow::bail!("compute get failed (503): backend unavailable");
        }
        let mut q = self.statuses.lock().unwrap();
        let status = if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        };
        status.ok_or_else(|| anyhow::anyhow!("status script is empty"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Reply(String),
    Defer,
    Followup(String),
}

pub struct RecordingInteraction {
    channel_id: u64,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingInteraction {
    pub fn new(channel_id: u64) -> Self {
        Self {
            channel_id,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Interaction for RecordingInteraction {
    fn channel_id(&self) -> u64 {
        self.channel_id
    }

    async fn reply(&self, content: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Sent::Reply(content.to_string()));
        Ok(())
    }

    async fn defer(&self) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Sent::Defer);
        Ok(())
    }

    async fn followup(&self, content: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Sent::Followup(content.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    activities: Mutex<Vec<Option<String>>>,
    messages: Mutex<Vec<(u64, String)>>,
    fail_activity: AtomicBool,
}

impl RecordingSink {
    pub fn fail_activity(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    pub fn activities(&self) -> Vec<Option<String>> {
        self.activities.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(u64, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatSink for RecordingSink {
    async fn set_activity(&self, activity: Option<String>) -> anyhow::Result<()> {
        if self.fail_activity.load(Ordering::SeqCst) {
            anyhow::bail!("presence rejected");
        }
        self.activities.lock().unwrap().push(activity);
        Ok(())
    }

    async fn send_to_channel(&self, channel_id: u64, content: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((channel_id, content.to_string()));
        Ok(())
    }
}
