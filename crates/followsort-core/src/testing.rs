//! In-memory port implementations for unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    domain::{EntityId, FollowedEntity, FollowingPage, Group, GroupId, OwnerId},
    errors::Error,
    ports::{ClassifierModel, ClassifierPrompt, FollowPlatform},
    Result,
};

#[derive(Default)]
pub struct FakePlatform {
    followings: Vec<FollowedEntity>,
    reported_total: Option<usize>,
    page_failures: Mutex<HashMap<u32, Error>>,
    groups: Mutex<Vec<Group>>,
    list_fails: bool,
    failing_creates: HashSet<String>,
    failing_assign_calls: HashSet<usize>,

    pages: Mutex<Vec<u32>>,
    list_calls: AtomicUsize,
    creates: Mutex<Vec<String>>,
    assigns: Mutex<Vec<(Vec<EntityId>, GroupId)>>,
}

impl FakePlatform {
    pub fn with_followings(mut self, entities: Vec<FollowedEntity>) -> Self {
        self.followings = entities;
        self
    }

    pub fn with_reported_total(mut self, total: usize) -> Self {
        self.reported_total = Some(total);
        self
    }

    pub fn failing_page(self, page: u32, err: Error) -> Self {
        self.page_failures.lock().unwrap().insert(page, err);
        self
    }

    pub fn with_group(self, id: i64, name: &str) -> Self {
        self.groups.lock().unwrap().push(Group {
            id: GroupId(id),
            name: name.to_string(),
            member_count: 0,
        });
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.list_fails = true;
        self
    }

    pub fn failing_create(mut self, name: &str) -> Self {
        self.failing_creates.insert(name.to_string());
        self
    }

    /// Fail the n-th (0-based) assign call across the whole run.
    pub fn failing_assign_call(mut self, index: usize) -> Self {
        self.failing_assign_calls.insert(index);
        self
    }

    pub fn page_calls(&self) -> Vec<u32> {
        self.pages.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.creates.lock().unwrap().clone()
    }

    pub fn assign_calls(&self) -> Vec<(Vec<EntityId>, GroupId)> {
        self.assigns.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.create_calls().len() + self.assign_calls().len()
    }
}

#[async_trait]
impl FollowPlatform for FakePlatform {
    async fn following_page(
        &self,
        _owner: OwnerId,
        page: u32,
        page_size: u32,
    ) -> Result<FollowingPage> {
        self.pages.lock().unwrap().push(page);
        if let Some(err) = self.page_failures.lock().unwrap().remove(&page) {
            return Err(err);
        }

        let size = page_size as usize;
        let start = (page as usize - 1) * size;
        let entities = if start >= self.followings.len() {
            Vec::new()
        } else {
            let end = (start + size).min(self.followings.len());
            self.followings[start..end].to_vec()
        };

        Ok(FollowingPage {
            entities,
            total: self.reported_total.unwrap_or(self.followings.len()),
        })
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails {
            return Err(Error::Transient("tags endpoint timed out".to_string()));
        }
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn create_group(&self, name: &str) -> Result<GroupId> {
        self.creates.lock().unwrap().push(name.to_string());
        if self.failing_creates.contains(name) {
            return Err(Error::Platform {
                code: 22106,
                message: format!("cannot create {name}"),
            });
        }
        let mut groups = self.groups.lock().unwrap();
        let id = GroupId(1000 + groups.len() as i64);
        groups.push(Group {
            id,
            name: name.to_string(),
            member_count: 0,
        });
        Ok(id)
    }

    async fn assign_to_group(&self, members: &[EntityId], group: GroupId) -> Result<()> {
        let index = {
            let mut assigns = self.assigns.lock().unwrap();
            assigns.push((members.to_vec(), group));
            assigns.len() - 1
        };
        if self.failing_assign_calls.contains(&index) {
            return Err(Error::Platform {
                code: -400,
                message: "assign rejected".to_string(),
            });
        }
        Ok(())
    }
}

type Responder = dyn Fn(usize, &ClassifierPrompt) -> Result<String> + Send + Sync;

/// Model double driven by a closure of `(call_index, prompt)`.
pub struct ScriptedModel {
    responder: Box<Responder>,
    prompts: Mutex<Vec<ClassifierPrompt>>,
}

impl ScriptedModel {
    pub fn new(
        responder: impl Fn(usize, &ClassifierPrompt) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answers with the given label for every listed name found in the prompt.
    pub fn by_name(labels: &[(&str, &str)]) -> Self {
        let labels: Vec<(String, String)> = labels
            .iter()
            .map(|(n, l)| (n.to_string(), l.to_string()))
            .collect();
        Self::new(move |_, prompt| Ok(verdicts_for_prompt(prompt, &labels)))
    }

    /// Run the responder without recording a call.
    pub fn respond(&self, prompt: &ClassifierPrompt) -> Result<String> {
        (self.responder)(0, prompt)
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<ClassifierPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

pub fn verdicts_for_prompt(prompt: &ClassifierPrompt, labels: &[(String, String)]) -> String {
    let results: Vec<_> = labels
        .iter()
        .filter(|(name, _)| prompt.user.contains(&format!("name: {name}\n")))
        .map(|(name, label)| {
            json!({"name": name, "category": label, "confidence": 0.9, "reason": "scripted"})
        })
        .collect();
    json!({ "results": results }).to_string()
}

#[async_trait]
impl ClassifierModel for ScriptedModel {
    async fn complete(&self, prompt: &ClassifierPrompt) -> Result<String> {
        let index = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.clone());
            prompts.len() - 1
        };
        (self.responder)(index, prompt)
    }
}
