//! Progress reporting for pack and unpack operations.

/// What a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// A volume was opened
    StartArchive,
    /// A volume was closed
    FinishArchive,
    StartFile,
    FinishFile,
    /// Another 64 KiB of the current file were processed
    PartialFile,
}

/// Snapshot passed to the progress handler.
///
/// Progress is advisory: handlers must not rely on seeing every
/// `PartialFile` event, only on the start/finish pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveProgress {
    pub kind: ProgressKind,
    pub current_volume: u32,
    pub current_file_name: String,
    /// Zero-based index of the current file among the files processed
    pub current_file_number: usize,
    pub total_files: usize,
    pub file_bytes_processed: u64,
    pub file_total_bytes: u64,
    pub total_bytes_processed: u64,
    pub total_bytes: u64,
}

/// Callback receiving progress events.
pub type ProgressHandler = Box<dyn FnMut(&ArchiveProgress) + Send>;

/// Bytes between two `PartialFile` events.
pub(crate) const PARTIAL_INTERVAL: u64 = 64 * 1024;

/// Progress state of one session and the handler it reports to.
pub(crate) struct Progress<'a> {
    handler: Option<&'a mut ProgressHandler>,
    state: ArchiveProgress,
    unreported: u64,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(handler: Option<&'a mut ProgressHandler>) -> Self {
        Self {
            handler,
            state: ArchiveProgress {
                kind: ProgressKind::StartArchive,
                current_volume: 0,
                current_file_name: String::new(),
                current_file_number: 0,
                total_files: 0,
                file_bytes_processed: 0,
                file_total_bytes: 0,
                total_bytes_processed: 0,
                total_bytes: 0,
            },
            unreported: 0,
        }
    }

    pub(crate) fn set_totals(&mut self, files: usize, bytes: u64) {
        self.state.total_files = files;
        self.state.total_bytes = bytes;
    }

    pub(crate) fn start_archive(&mut self, volume: u32) {
        self.state.current_volume = volume;
        self.emit(ProgressKind::StartArchive);
    }

    pub(crate) fn finish_archive(&mut self) {
        self.emit(ProgressKind::FinishArchive);
    }

    pub(crate) fn start_file(&mut self, name: &str, number: usize, length: u64) {
        self.state.current_file_name = name.to_string();
        self.state.current_file_number = number;
        self.state.file_total_bytes = length;
        self.state.file_bytes_processed = 0;
        self.unreported = 0;
        self.emit(ProgressKind::StartFile);
    }

    /// Account for `bytes` more of the current file.
    pub(crate) fn advance(&mut self, bytes: u64) {
        self.state.file_bytes_processed += bytes;
        self.state.total_bytes_processed += bytes;
        self.unreported += bytes;
        if self.unreported >= PARTIAL_INTERVAL {
            self.unreported = 0;
            self.emit(ProgressKind::PartialFile);
        }
    }

    pub(crate) fn finish_file(&mut self) {
        self.emit(ProgressKind::FinishFile);
    }

    fn emit(&mut self, kind: ProgressKind) {
        if let Some(handler) = self.handler.as_mut() {
            self.state.kind = kind;
            handler(&self.state);
        }
    }
}
