//! Scripted capability mocks that record every call in a shared journal.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use ota_core::{
    ChunkStatus, ConfigError, CoordinationToken, DownloadRequest, DownloadSession, FirmwareInstaller,
    NetworkStatus, PlatformError, Progress, SecureDownloader, SystemControl, TokenGuard,
    UpdateConfig, UpdateScheduler, VersionDescriptor,
};

pub const TEST_URL: &str = "https://updates.example.com/firmware.bin";
const CHUNK_BYTES: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    NetworkQuery,
    Begin { url: String, buffer_size: usize },
    ImageVersion,
    RunningVersion { token_held: bool },
    Chunk { index: u32, token_held: bool },
    Abort,
    Finish { token_held: bool },
    Delay(Duration),
    Restart { token_held: bool },
}

#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Call>>>);

impl Journal {
    pub fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn chunk_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Chunk { .. }))
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.borrow().iter().position(pred)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.0
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Delay(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Token that lives for the whole test binary, like the firmware's static.
pub fn leak_token() -> &'static CoordinationToken {
    Box::leak(Box::new(CoordinationToken::new()))
}

pub fn version(label: &str) -> VersionDescriptor {
    VersionDescriptor::from_label(label)
}

pub fn dns_failure() -> PlatformError {
    PlatformError::new(0x7002, "ESP_ERR_HTTP_CONNECT")
}

pub fn transport_failure() -> PlatformError {
    PlatformError::new(0x7007, "ESP_ERR_HTTP_EAGAIN")
}

pub fn validation_failure() -> PlatformError {
    PlatformError::new(0x1503, "ESP_ERR_OTA_VALIDATE_FAILED")
}

pub struct MockNetwork {
    ready: bool,
    journal: Journal,
}

impl NetworkStatus for MockNetwork {
    fn is_network_ready(&self) -> bool {
        self.journal.push(Call::NetworkQuery);
        self.ready
    }
}

/// What the remote end does during one session.
#[derive(Debug, Clone)]
pub struct Script {
    pub begin: Result<(), PlatformError>,
    pub candidate: Result<VersionDescriptor, PlatformError>,
    /// Results of successive chunk calls. `Done` once exhausted.
    pub chunks: Vec<Result<ChunkStatus, PlatformError>>,
}

impl Script {
    pub fn in_progress_chunks(n: usize) -> Vec<Result<ChunkStatus, PlatformError>> {
        vec![Ok(ChunkStatus::InProgress); n]
    }
}

pub struct MockDownloader {
    script: Script,
    journal: Journal,
    token: &'static CoordinationToken,
}

impl SecureDownloader for MockDownloader {
    type Session = MockSession;

    fn begin(&mut self, request: &DownloadRequest<'_>) -> Result<MockSession, PlatformError> {
        self.journal.push(Call::Begin {
            url: request.url.to_string(),
            buffer_size: request.buffer_size,
        });
        self.script.begin.clone()?;
        Ok(MockSession {
            candidate: self.script.candidate.clone(),
            chunks: self.script.chunks.iter().cloned().collect(),
            index: 0,
            journal: self.journal.clone(),
            token: self.token,
        })
    }
}

pub struct MockSession {
    candidate: Result<VersionDescriptor, PlatformError>,
    chunks: VecDeque<Result<ChunkStatus, PlatformError>>,
    index: u32,
    journal: Journal,
    token: &'static CoordinationToken,
}

impl DownloadSession for MockSession {
    fn image_version(&mut self) -> Result<VersionDescriptor, PlatformError> {
        self.journal.push(Call::ImageVersion);
        self.candidate.clone()
    }

    fn perform_chunk(&mut self) -> Result<ChunkStatus, PlatformError> {
        self.index += 1;
        self.journal.push(Call::Chunk {
            index: self.index,
            token_held: self.token.is_held(),
        });
        self.chunks.pop_front().unwrap_or(Ok(ChunkStatus::Done))
    }

    fn progress(&self) -> Option<Progress> {
        Some(Progress {
            bytes_read: self.index as usize * CHUNK_BYTES,
            total: None,
        })
    }

    fn abort(self) {
        self.journal.push(Call::Abort);
    }
}

pub struct MockInstaller {
    running: Result<VersionDescriptor, PlatformError>,
    finish: Result<(), PlatformError>,
    journal: Journal,
    token: &'static CoordinationToken,
    /// Application side claims the token while the version is read and
    /// keeps it until the installer is dropped.
    app_claims_token: bool,
    app_guard: RefCell<Option<TokenGuard<'static>>>,
}

impl FirmwareInstaller<MockSession> for MockInstaller {
    fn running_version(&self) -> Result<VersionDescriptor, PlatformError> {
        self.journal.push(Call::RunningVersion {
            token_held: self.token.is_held(),
        });
        if self.app_claims_token {
            *self.app_guard.borrow_mut() = self.token.try_acquire();
        }
        self.running.clone()
    }

    fn finish(&mut self, _session: MockSession) -> Result<(), PlatformError> {
        self.journal.push(Call::Finish {
            token_held: self.token.is_held(),
        });
        self.finish.clone()
    }
}

pub struct MockSystem {
    journal: Journal,
    token: &'static CoordinationToken,
}

impl SystemControl for MockSystem {
    fn delay(&mut self, duration: Duration) {
        self.journal.push(Call::Delay(duration));
    }

    fn restart(&mut self) {
        self.journal.push(Call::Restart {
            token_held: self.token.is_held(),
        });
    }
}

pub type MockScheduler =
    UpdateScheduler<'static, MockNetwork, MockDownloader, MockInstaller, MockSystem>;

/// A device on the network, running v1.2.3, with v1.3.0 published.
pub struct Harness {
    pub journal: Journal,
    pub token: &'static CoordinationToken,
    pub config: UpdateConfig,
    pub network_ready: bool,
    pub script: Script,
    pub running: Result<VersionDescriptor, PlatformError>,
    pub finish: Result<(), PlatformError>,
    pub app_claims_token_during_compare: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            journal: Journal::default(),
            token: leak_token(),
            config: UpdateConfig::with_url(TEST_URL),
            network_ready: true,
            script: Script {
                begin: Ok(()),
                candidate: Ok(version("v1.3.0")),
                chunks: Script::in_progress_chunks(3),
            },
            running: Ok(version("v1.2.3")),
            finish: Ok(()),
            app_claims_token_during_compare: false,
        }
    }

    pub fn scheduler(&self) -> MockScheduler {
        self.try_scheduler().expect("test configuration is valid")
    }

    pub fn try_scheduler(&self) -> Result<MockScheduler, ConfigError> {
        UpdateScheduler::new(
            self.config.clone(),
            self.token,
            MockNetwork {
                ready: self.network_ready,
                journal: self.journal.clone(),
            },
            MockDownloader {
                script: self.script.clone(),
                journal: self.journal.clone(),
                token: self.token,
            },
            MockInstaller {
                running: self.running.clone(),
                finish: self.finish.clone(),
                journal: self.journal.clone(),
                token: self.token,
                app_claims_token: self.app_claims_token_during_compare,
                app_guard: RefCell::new(None),
            },
            MockSystem {
                journal: self.journal.clone(),
                token: self.token,
            },
        )
    }

    /// Acquisitions and releases balance and nothing holds the token.
    pub fn assert_token_balanced(&self) {
        let stats = self.token.stats();
        assert_eq!(stats.acquisitions, stats.releases, "token stats: {:?}", stats);
        assert!(!self.token.is_held());
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
