//! Process exit codes
//!
//! The numeric values are part of the command line contract and must stay
//! stable.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    InvocationError = 1,
    EnvironmentError = 2,
    ConfigurationError = 3,
    PreProcessingFailed = 4,
    TrainingFailed = 5,
    DownloadFailed = 6,
    ExtractionFailed = 7,
    CopyFailed = 8,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let codes = [
            ExitCode::Success,
            ExitCode::InvocationError,
            ExitCode::EnvironmentError,
            ExitCode::ConfigurationError,
            ExitCode::PreProcessingFailed,
            ExitCode::TrainingFailed,
            ExitCode::DownloadFailed,
            ExitCode::ExtractionFailed,
            ExitCode::CopyFailed,
        ];
        for (expected, code) in codes.iter().enumerate() {
            assert_eq!(code.code() as usize, expected);
        }
    }
}
