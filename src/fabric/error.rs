/// The way in which PEs disagreed about a collective allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// a pe id outside of the job
    InvalidPe { pe: usize, num_pes: usize },
    /// the job was launched with a different pe count on some pe
    NumPes { expected: usize, found: usize },
    /// a pe is at a different point in its allocation sequence
    Sequence { pe: usize, expected: usize, found: usize },
    /// a pe requested a different number of bytes
    Size { pe: usize, expected: usize, found: usize },
    /// a pe requested a different element type or label
    Tag { pe: usize },
    /// an existing shared memory segment is smaller than this pe requires
    Segment { expected: usize, found: usize },
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MismatchKind::InvalidPe { pe, num_pes } => {
                write!(f, "pe {} is not part of a job with {} pes", pe, num_pes)
            }
            MismatchKind::NumPes { expected, found } => {
                write!(f, "expected {} pes but the job was created with {}", expected, found)
            }
            MismatchKind::Sequence {
                pe,
                expected,
                found,
            } => write!(
                f,
                "pe {} is at allocation {} while this pe is at allocation {}",
                pe, found, expected
            ),
            MismatchKind::Size {
                pe,
                expected,
                found,
            } => write!(
                f,
                "pe {} requested {} bytes while this pe requested {} bytes",
                pe, found, expected
            ),
            MismatchKind::Tag { pe } => {
                write!(f, "pe {} allocated a buffer with a different type or label", pe)
            }
            MismatchKind::Segment { expected, found } => write!(
                f,
                "shared segment holds {} bytes, at least {} are required",
                found, expected
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemoryError(usize),
    ZeroSized,
    TopologyMismatch(MismatchKind),
    FabricAllocationError(String),
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AllocError::OutOfMemoryError(size) => {
                write!(f, "not enough memory to allocate {} bytes", size)
            }
            AllocError::ZeroSized => write!(f, "cant have zero sized symmetric buffer"),
            AllocError::TopologyMismatch(kind) => {
                write!(f, "symmetric allocation mismatch: {}", kind)
            }
            AllocError::FabricAllocationError(msg) => {
                write!(f, "Fabric allocation error: {}", msg)
            }
        }
    }
}

impl std::error::Error for AllocError {}

pub(crate) type AllocResult<T> = Result<T, AllocError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdmaError {
    InvalidPe { pe: usize, num_pes: usize },
    OutOfBounds { offset: usize, len: usize, size: usize },
}

pub(crate) type RdmaResult<T = ()> = Result<T, RdmaError>;

impl std::fmt::Display for RdmaError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RdmaError::InvalidPe { pe, num_pes } => {
                write!(f, "invalid pe {} (num_pes {})", pe, num_pes)
            }
            RdmaError::OutOfBounds { offset, len, size } => write!(
                f,
                "rdma of {} bytes at offset {} exceeds buffer of {} bytes",
                len, offset, size
            ),
        }
    }
}

impl std::error::Error for RdmaError {}
