//! Scripted collaborators with call counters

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use callgate_ingest::models::IngestionDocument;
use callgate_ingest::services::{
    AudioFetcher, CollaboratorError, Collaborators, CrmClient, Extraction, Extractor, LeadData,
    RecordPersister, StageContext, Transcriber, Transcript,
};

/// How the mocks behave
#[derive(Debug, Clone)]
pub struct Script {
    pub audio_fails: bool,
    pub transcription_fails: bool,
    pub extraction_fails: bool,
    pub persistence_fails: bool,
    pub crm_fails: bool,
    pub extraction_confidence: f64,
    pub extracted_data: Value,
    pub transcribe_delay: Duration,
    /// Extra transcription delay for specific call ids
    pub transcribe_delay_for: HashMap<String, Duration>,
    pub crm_delay: Duration,
    pub crm_lead_id: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            audio_fails: false,
            transcription_fails: false,
            extraction_fails: false,
            persistence_fails: false,
            crm_fails: false,
            extraction_confidence: 0.92,
            extracted_data: json!({"intent": "quote_request", "product": "solar panels"}),
            transcribe_delay: Duration::ZERO,
            transcribe_delay_for: HashMap::new(),
            crm_delay: Duration::ZERO,
            crm_lead_id: "lead-001".to_string(),
        }
    }
}

/// Calls observed per collaborator
#[derive(Debug, Default)]
pub struct CallCounters {
    audio: AtomicUsize,
    transcribe: AtomicUsize,
    extract: AtomicUsize,
    persist: AtomicUsize,
    crm: AtomicUsize,
}

impl CallCounters {
    pub fn audio(&self) -> usize {
        self.audio.load(Ordering::SeqCst)
    }
    pub fn transcribe(&self) -> usize {
        self.transcribe.load(Ordering::SeqCst)
    }
    pub fn extract(&self) -> usize {
        self.extract.load(Ordering::SeqCst)
    }
    pub fn persist(&self) -> usize {
        self.persist.load(Ordering::SeqCst)
    }
    pub fn crm(&self) -> usize {
        self.crm.load(Ordering::SeqCst)
    }
}

/// One object standing in for every collaborator
pub struct ScriptedCollaborators {
    script: Script,
    counters: Arc<CallCounters>,
    leads: Mutex<Vec<LeadData>>,
    documents: Mutex<Vec<IngestionDocument>>,
}

impl ScriptedCollaborators {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            counters: Arc::new(CallCounters::default()),
            leads: Mutex::new(Vec::new()),
            documents: Mutex::new(Vec::new()),
        })
    }

    pub fn counters(&self) -> Arc<CallCounters> {
        Arc::clone(&self.counters)
    }

    pub fn leads(&self) -> Vec<LeadData> {
        self.leads.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<IngestionDocument> {
        self.documents.lock().unwrap().clone()
    }

    fn delay_for_recording(&self, audio: &[u8]) -> Duration {
        let audio = String::from_utf8_lossy(audio);
        self.script
            .transcribe_delay_for
            .iter()
            .find(|(call_id, _)| audio.ends_with(&format!("/{}.wav", call_id)))
            .map(|(_, delay)| *delay)
            .unwrap_or(Duration::ZERO)
    }

    pub fn bundle(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            audio: self.clone(),
            transcriber: self.clone(),
            extractor: self.clone(),
            persister: self.clone(),
            crm: self.clone(),
        }
    }
}

#[async_trait]
impl AudioFetcher for ScriptedCollaborators {
    async fn fetch(&self, recording_url: &str, _ctx: &StageContext) -> Result<Vec<u8>, CollaboratorError> {
        self.counters.audio.fetch_add(1, Ordering::SeqCst);
        if self.script.audio_fails {
            return Err(CollaboratorError::Rejected(format!("{} returned 404", recording_url)));
        }
        // Recording URL rides along in the fake audio so later stages can tell calls apart
        let mut audio = b"RIFF....WAVEfmt ".to_vec();
        audio.extend_from_slice(recording_url.as_bytes());
        Ok(audio)
    }
}

#[async_trait]
impl Transcriber for ScriptedCollaborators {
    async fn transcribe(&self, audio: &[u8], _ctx: &StageContext) -> Result<Transcript, CollaboratorError> {
        self.counters.transcribe.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.transcribe_delay + self.delay_for_recording(audio);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.transcription_fails {
            return Err(CollaboratorError::Unavailable("transcription returned 502".to_string()));
        }
        Ok(Transcript {
            text: "Hi, I'd like a quote for solar panels. Call me at 555-123-4567.".to_string(),
            confidence: 0.97,
        })
    }
}

#[async_trait]
impl Extractor for ScriptedCollaborators {
    async fn extract(
        &self,
        _transcript: &str,
        _rules: &Value,
        _ctx: &StageContext,
    ) -> Result<Extraction, CollaboratorError> {
        self.counters.extract.fetch_add(1, Ordering::SeqCst);
        if self.script.extraction_fails {
            return Err(CollaboratorError::InvalidResponse("extraction returned garbage".to_string()));
        }
        Ok(Extraction {
            data: self.script.extracted_data.clone(),
            confidence: self.script.extraction_confidence,
        })
    }
}

#[async_trait]
impl RecordPersister for ScriptedCollaborators {
    async fn save(&self, document: &IngestionDocument, _ctx: &StageContext) -> Result<(), CollaboratorError> {
        self.counters.persist.fetch_add(1, Ordering::SeqCst);
        if self.script.persistence_fails {
            return Err(CollaboratorError::Unavailable("disk full".to_string()));
        }
        self.documents.lock().unwrap().push(document.clone());
        Ok(())
    }
}

#[async_trait]
impl CrmClient for ScriptedCollaborators {
    async fn create_lead(
        &self,
        lead: &LeadData,
        _crm_config: &Value,
        _ctx: &StageContext,
    ) -> Result<String, CollaboratorError> {
        self.counters.crm.fetch_add(1, Ordering::SeqCst);
        if !self.script.crm_delay.is_zero() {
            tokio::time::sleep(self.script.crm_delay).await;
        }
        if self.script.crm_fails {
            return Err(CollaboratorError::Unavailable("CRM returned 503".to_string()));
        }
        self.leads.lock().unwrap().push(lead.clone());
        Ok(self.script.crm_lead_id.clone())
    }
}
