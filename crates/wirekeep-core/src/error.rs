// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::config::ConfigError;
use crate::traffic::TrafficError;

pub const APP_NAME: &str = "wirekeep";

#[derive(Debug, thiserror::Error)]
pub enum WireguardError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Command(String),

    #[error(
        "unable to perform an operation which requires root permissions. \
         Make sure {}'s permissions are correctly set.",
        APP_NAME
    )]
    RootRequired,

    #[error("failed to persist configuration: {0}")]
    Persistence(#[from] ConfigError),

    #[error("traffic storage error: {0}")]
    Traffic(#[from] TrafficError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireguardError {
    pub fn invalid(cause: impl Into<String>) -> Self {
        Self::InvalidInput(cause.into())
    }

    pub fn not_found(cause: impl Into<String>) -> Self {
        Self::NotFound(cause.into())
    }

    /// Error for a failed subprocess, built from its stderr.
    pub fn command(cause: impl Into<String>) -> Self {
        let cause = cause.into();
        if cause.contains("sudo") {
            Self::RootRequired
        } else {
            Self::Command(cause)
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::Command(_)
            | Self::RootRequired
            | Self::Persistence(_)
            | Self::Traffic(_)
            | Self::Io(_) => 500,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.status_code() < 500
    }
}
