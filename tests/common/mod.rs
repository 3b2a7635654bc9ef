#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use facegate::error::{CaptureError, ChannelError, StorageError};
use facegate::{
    CameraDevice, CredentialStore, Embedding, EmbeddingProvider, FaceRegion, FaceSample, Frame,
    FrameStream, Notifier, QualityGate,
};

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;
pub const DIM: usize = 4;

/// Frame whose top-left red value carries `tag`.
pub fn frame(tag: u8) -> Frame {
    let mut img = Frame::new(FRAME_WIDTH, FRAME_HEIGHT);
    img.put_pixel(0, 0, image::Rgb([tag, 0, 0]));
    img
}

pub fn tag_of(frame: &Frame) -> u8 {
    frame.get_pixel(0, 0)[0]
}

/// One-hot embedding for the identity behind `tag`.
pub fn identity(tag: u8) -> Embedding {
    let mut values = vec![0.0; DIM];
    values[tag as usize % DIM] = 1.0;
    Embedding::new(values)
}

/// Camera replaying a script of reads. `None` is a failed read. Once the
/// script runs out the final entry repeats forever.
pub struct ScriptedCamera {
    pub script: Vec<Option<u8>>,
    pub fail_open: bool,
    pub opens: Cell<usize>,
    pub reads: Rc<Cell<usize>>,
    pub released: Rc<Cell<bool>>,
}

impl ScriptedCamera {
    pub fn new(script: Vec<Option<u8>>) -> Self {
        Self {
            script,
            fail_open: false,
            opens: Cell::new(0),
            reads: Rc::new(Cell::new(0)),
            released: Rc::new(Cell::new(false)),
        }
    }

    pub fn frames(tags: &[u8]) -> Self {
        Self::new(tags.iter().copied().map(Some).collect())
    }

    pub fn unavailable() -> Self {
        let mut camera = Self::new(Vec::new());
        camera.fail_open = true;
        camera
    }
}

pub struct ScriptedStream {
    pending: VecDeque<Option<u8>>,
    tail: Option<u8>,
    reads: Rc<Cell<usize>>,
    released: Rc<Cell<bool>>,
}

impl CameraDevice for ScriptedCamera {
    type Stream = ScriptedStream;

    fn open(&self) -> Result<ScriptedStream, CaptureError> {
        self.opens.set(self.opens.get() + 1);
        if self.fail_open {
            return Err(CaptureError::DeviceOpen {
                device: "stub".into(),
                message: "no such device".into(),
            });
        }
        self.released.set(false);
        Ok(ScriptedStream {
            pending: self.script.iter().copied().collect(),
            tail: self.script.last().copied().flatten(),
            reads: Rc::clone(&self.reads),
            released: Rc::clone(&self.released),
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

impl FrameStream for ScriptedStream {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.reads.set(self.reads.get() + 1);
        let next = self.pending.pop_front().unwrap_or(self.tail);
        next.map(frame)
            .ok_or_else(|| CaptureError::FrameRead("scripted failure".into()))
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.released.set(true);
    }
}

/// Provider mapping frame tags to identities. Tag 0 has no face.
pub struct TagProvider {
    pub face_width: f32,
    pub fail: bool,
    pub calls: Cell<usize>,
    /// Directory whose `img0.jpg` presence is recorded on every call.
    pub watch_dir: Option<PathBuf>,
    pub artifact_seen: Cell<bool>,
}

impl TagProvider {
    pub fn new() -> Self {
        Self {
            face_width: 24.0,
            fail: false,
            calls: Cell::new(0),
            watch_dir: None,
            artifact_seen: Cell::new(false),
        }
    }
}

impl EmbeddingProvider for TagProvider {
    fn detect_and_embed(&mut self, image: &Frame) -> anyhow::Result<Vec<FaceSample>> {
        self.calls.set(self.calls.get() + 1);
        if let Some(dir) = &self.watch_dir {
            if dir.join("img0.jpg").exists() {
                self.artifact_seen.set(true);
            }
        }
        if self.fail {
            anyhow::bail!("model exploded");
        }
        let tag = tag_of(image);
        if tag == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![FaceSample {
            region: FaceRegion {
                x: 8.0,
                y: 8.0,
                width: self.face_width,
                height: self.face_width,
            },
            embedding: identity(tag),
        }])
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

pub struct StubGate {
    pub usable: bool,
    pub calls: Cell<usize>,
}

impl StubGate {
    pub fn passing() -> Self {
        Self {
            usable: true,
            calls: Cell::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            usable: false,
            calls: Cell::new(0),
        }
    }
}

impl QualityGate for StubGate {
    fn is_usable(&mut self, _image: &Frame) -> bool {
        self.calls.set(self.calls.get() + 1);
        self.usable
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    None,
    ProbeFails,
    InsertFails,
    InsertDuplicate,
}

/// In-memory store recording every call.
pub struct StubStore {
    pub existing: RefCell<Vec<String>>,
    pub fault: StoreFault,
    pub exists_calls: Cell<usize>,
    pub add_calls: Cell<usize>,
    pub stored: RefCell<Vec<(String, String, String)>>,
}

impl StubStore {
    pub fn new() -> Self {
        Self::with_fault(StoreFault::None)
    }

    pub fn with_fault(fault: StoreFault) -> Self {
        Self {
            existing: RefCell::new(Vec::new()),
            fault,
            exists_calls: Cell::new(0),
            add_calls: Cell::new(0),
            stored: RefCell::new(Vec::new()),
        }
    }

    pub fn seeded(username: &str) -> Self {
        let store = Self::new();
        store.existing.borrow_mut().push(username.to_string());
        store
    }
}

impl CredentialStore for StubStore {
    fn username_exists(&self, username: &str) -> Result<bool, StorageError> {
        self.exists_calls.set(self.exists_calls.get() + 1);
        if self.fault == StoreFault::ProbeFails {
            return Err(StorageError::Prepare {
                path: "stub.db".into(),
                source: io::Error::new(io::ErrorKind::Other, "disk gone"),
            });
        }
        Ok(self.existing.borrow().iter().any(|u| u == username))
    }

    fn add_user(
        &self,
        username: &str,
        password_hash: &str,
        embedding_hash: &str,
    ) -> Result<(), StorageError> {
        self.add_calls.set(self.add_calls.get() + 1);
        match self.fault {
            StoreFault::InsertFails => {
                return Err(StorageError::Prepare {
                    path: "stub.db".into(),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                })
            }
            StoreFault::InsertDuplicate => {
                return Err(StorageError::Duplicate {
                    username: username.to_string(),
                })
            }
            _ => {}
        }
        self.existing.borrow_mut().push(username.to_string());
        self.stored.borrow_mut().push((
            username.to_string(),
            password_hash.to_string(),
            embedding_hash.to_string(),
        ));
        Ok(())
    }
}

/// Notifier recording signals, optionally failing with a timeout.
pub struct RecordingNotifier {
    pub messages: RefCell<Vec<String>>,
    pub time_out: bool,
    /// Observed camera release state at signal time.
    pub camera_released: Option<Rc<Cell<bool>>>,
    pub released_at_signal: Cell<Option<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            messages: RefCell::new(Vec::new()),
            time_out: false,
            camera_released: None,
            released_at_signal: Cell::new(None),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn signal(&self, message: &str) -> Result<(), ChannelError> {
        self.messages.borrow_mut().push(message.to_string());
        if let Some(flag) = &self.camera_released {
            self.released_at_signal.set(Some(flag.get()));
        }
        if self.time_out {
            return Err(ChannelError::Timeout {
                addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
                timeout: Duration::from_secs(2),
            });
        }
        Ok(())
    }
}
