//! Per-layer error types
//!
//! Parsers return the most specific structural violation. Scan loops
//! collapse benign "wrong message phase" outcomes into keep-waiting and
//! surface everything else as a `ScanError`. Discovery aggregates errors
//! across carousel candidates by severity so a total failure reports the
//! most informative cause rather than the last one tried.

use thiserror::Error;

/// A malformed section, one variant per violated structural field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("section data truncated")]
    Truncated,
    #[error("unexpected table id 0x{0:02X}")]
    TableId(u8),
    #[error("bad protocol discriminator 0x{0:02X}")]
    Discriminator(u8),
    #[error("not a user-network message (type 0x{0:02X})")]
    MessageKind(u8),
    #[error("unexpected message id 0x{0:04X}")]
    MessageId(u16),
    #[error("reserved byte not 0xFF")]
    Reserved,
    #[error("adaptation header present")]
    Adaptation,
    #[error("zero message length")]
    MessageLength,
    #[error("registration descriptor missing or foreign")]
    Registration,
    #[error("foreign network id 0x{0:04X}")]
    NetworkId(u16),
    #[error("network version 0x{0:X} not signaled")]
    NetworkVersion(u16),
    #[error("bad time descriptor")]
    TimeDescriptor,
    #[error("compatibility descriptor present in message header")]
    CompatibilityDescriptor,
    #[error("private data missing")]
    PrivateData,
    #[error("module lists no compatibility entries")]
    NoCompatibilityEntries,
    #[error("module lists no schedule slots")]
    NoScheduleSlots,
    #[error("block {block} past last block {last}")]
    BlockRange { block: u16, last: u16 },
    #[error("unsupported table protocol version {0}")]
    ProtocolVersion(u8),
    #[error("service table lists no channels")]
    NoChannels,
}

impl ParseError {
    /// Stable per-condition code for event-ring deduplication.
    pub fn code(&self) -> u16 {
        match self {
            ParseError::Truncated => 1,
            ParseError::TableId(_) => 2,
            ParseError::Discriminator(_) => 3,
            ParseError::MessageKind(_) => 4,
            ParseError::MessageId(_) => 5,
            ParseError::Reserved => 6,
            ParseError::Adaptation => 7,
            ParseError::MessageLength => 8,
            ParseError::Registration => 9,
            ParseError::NetworkId(_) => 10,
            ParseError::NetworkVersion(_) => 11,
            ParseError::TimeDescriptor => 12,
            ParseError::CompatibilityDescriptor => 13,
            ParseError::PrivateData => 14,
            ParseError::NoCompatibilityEntries => 15,
            ParseError::NoScheduleSlots => 16,
            ParseError::BlockRange { .. } => 17,
            ParseError::ProtocolVersion(_) => 18,
            ParseError::NoChannels => 19,
        }
    }
}

/// Which bounded wait a scan was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    ServiceTable,
    AssociationTable,
    MapTable,
    ServerInitiate,
    ModuleInfo,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScanPhase::ServiceTable => "service table",
            ScanPhase::AssociationTable => "association table",
            ScanPhase::MapTable => "map table",
            ScanPhase::ServerInitiate => "server-initiate",
            ScanPhase::ModuleInfo => "module-info",
        };
        f.write_str(name)
    }
}

/// Failure of one scan phase or of a whole frequency scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("{0} wait elapsed")]
    Timeout(ScanPhase),
    #[error("{0} table has no free slots")]
    TableFull(&'static str),
    #[error("no download service announced on this transport")]
    NoDownloadService,
    #[error("tuner: {0}")]
    Tune(String),
    #[error("aborted")]
    Aborted,
}

impl ScanError {
    /// Severity rank used for worst-error aggregation across carousel
    /// candidates. Higher is more informative to report.
    pub fn severity(&self) -> u8 {
        match self {
            ScanError::Parse(_) => 1,
            ScanError::NoDownloadService => 2,
            ScanError::Timeout(_) => 3,
            ScanError::TableFull(_) => 4,
            ScanError::Tune(_) => 5,
            ScanError::Aborted => 6,
        }
    }

    /// Keep whichever of two errors ranks worse.
    pub fn worst(a: Option<ScanError>, b: ScanError) -> ScanError {
        match a {
            Some(a) if a.severity() >= b.severity() => a,
            _ => b,
        }
    }
}

/// A specific compatibility rejection. Not a failure of the scan, only
/// of one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Incompatibility {
    #[error("organization id does not match")]
    OrganizationId,
    #[error("model group does not match")]
    ModelGroup,
    #[error("hardware model out of range")]
    HardwareModel,
    #[error("software version out of range")]
    SoftwareVersion,
    #[error("module version not newer than installed")]
    ModuleVersionCurrent,
    #[error("dependency {0} missing from manifest")]
    DependencyMissing(String),
    #[error("dependency {0} version out of range")]
    Dependency(String),
    #[error("field test attribute does not match device mode")]
    FieldTest,
    #[error("factory test attribute does not match device mode")]
    FactoryTest,
    #[error("component {0} not present in manifest")]
    UnknownComponent(String),
    #[error("update carries administrative commands")]
    CommandsPresent,
}

impl Incompatibility {
    /// Stable per-condition code for event-ring deduplication.
    pub fn code(&self) -> u16 {
        match self {
            Incompatibility::OrganizationId => 1,
            Incompatibility::ModelGroup => 2,
            Incompatibility::HardwareModel => 3,
            Incompatibility::SoftwareVersion => 4,
            Incompatibility::ModuleVersionCurrent => 5,
            Incompatibility::DependencyMissing(_) => 6,
            Incompatibility::Dependency(_) => 7,
            Incompatibility::FieldTest => 8,
            Incompatibility::FactoryTest => 9,
            Incompatibility::UnknownComponent(_) => 10,
            Incompatibility::CommandsPresent => 11,
        }
    }
}

/// Why a schedule slot was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleReject {
    /// Already past or beyond the acceptance horizon
    TooLate,
    /// Starts before the wake-up-early threshold
    TooEarly,
    /// Later than an already-accepted slot for the same module
    Later,
}

/// Most recent reason a module-info section produced no candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiiReject {
    Schedule(ScheduleReject),
    Incompatible(Incompatibility),
}

impl std::fmt::Display for DiiReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiiReject::Schedule(ScheduleReject::TooLate) => f.write_str("schedule slot too late"),
            DiiReject::Schedule(ScheduleReject::TooEarly) => f.write_str("schedule slot too early"),
            DiiReject::Schedule(ScheduleReject::Later) => {
                f.write_str("schedule slot later than accepted")
            }
            DiiReject::Incompatible(i) => write!(f, "{}", i),
        }
    }
}

/// Failure of the module download and assembly engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("block wait elapsed with {missing} blocks outstanding")]
    BlockTimeout { missing: usize },
    #[error("module signature mismatch")]
    Signature,
    #[error("unsupported signature header version {0}")]
    HeaderVersion(u8),
    #[error("module sizes disagree: header claims {header}, received {received}")]
    SizesDisagree { header: u32, received: u32 },
    #[error("component {0} not named by the manifest")]
    UnknownComponent(String),
    #[error("component directory: {0}")]
    Directory(String),
    #[error("directory and signaled module versions disagree")]
    VersionsDisagree,
    #[error("module id tracker has no free slots")]
    TrackerFull,
    #[error("aborted")]
    Aborted,
    #[error("install: {0}")]
    Install(String),
    #[error("store: {0}")]
    Store(String),
}
