use crate::cable::CableError;
use crate::idcode::ScanChainError;
use crate::part::PartError;
use crate::register::RegisterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("An error with the cable occurred")]
    Cable(#[from] CableError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Part(#[from] PartError),
    #[error("Scanning the chain failed")]
    ScanChain(#[from] ScanChainError),
    #[error("Invalid configuration")]
    Config(#[from] serde_yaml::Error),
    #[error("No cable is connected")]
    NoCable,
    #[error("Part {0} has no active instruction")]
    PartWithoutInstruction(usize),
    #[error("The active instruction of part {0} selects no data register")]
    PartWithoutDataRegister(usize),
    #[error("Part {0} does not exist")]
    InvalidPartIndex(usize),
    #[error("Part {part}: {source}")]
    InPart {
        part: usize,
        #[source]
        source: PartError,
    },
    #[error("Detection failed: {0}")]
    DetectionFailed(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
