use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::primitives::bytes::ByteCount;

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load storage configuration from '{path}'")]
    LoadConfiguration { path: String },
    #[error("Failed to parse storage configuration")]
    ParseConfiguration,
    #[error("Failed to load device snapshot from '{path}'")]
    LoadDeviceSnapshot { path: String },
    #[error("Failed to parse device snapshot")]
    ParseDeviceSnapshot,
    #[error("Failed to load mount table from '{path}'")]
    LoadMountTable { path: String },
    #[error("{entity} '{name}' has unknown type '{kind}'")]
    UnknownKind {
        entity: &'static str,
        name: String,
        kind: String,
    },
}

/// Reconciling the desired state against the device graph failed. Nothing has
/// been executed when one of these is raised.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ReconciliationError {
    #[error("Failed to look up or create device '{name}'")]
    UnresolvedDevice { name: String },
    #[error("Failed to create '{name}'")]
    CreationFailure { name: String },
    #[error("Device '{device}' is not resizable ({from} -> {to})")]
    ResizeRejected {
        device: String,
        from: ByteCount,
        to: ByteCount,
    },
    #[error("Failed to schedule '{name}'")]
    Schedule { name: String },
    #[error("Failed to lay out pending partitions")]
    Layout,
}

/// Executing the scheduled actions, or reading the state they depend on,
/// failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionError {
    #[error("Failed to read current mount table")]
    ReadMountTable,
    #[error("Failed to execute scheduled actions")]
    ExecuteActions,
    #[error("Failed to write report to '{path}'")]
    WriteReport { path: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Caught panic: {0}")]
    Panic(String),
    #[error("Failed to serialize report")]
    SerializeReport,
}

/// Each variant of `ErrorKind` corresponds to a different category of error. The categories are
/// intended to be user-meaningful and to tell apart bad input from a failing device stack.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The desired state or its supporting files were invalid.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// The desired state could not be mapped onto the device graph.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// The scheduled changes could not be carried out.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// An uncategorized error occurred or a bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct BlockstackErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct BlockstackError(Box<BlockstackErrorInner>);
impl BlockstackError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        BlockstackError(Box::new(BlockstackErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured BlockstackError.
    fn structured(self, kind: K) -> Result<T, BlockstackError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, BlockstackError> {
        match self {
            Some(t) => Ok(t),
            None => Err(BlockstackError(Box::new(BlockstackErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, BlockstackError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(BlockstackError(Box::new(BlockstackErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait BlockstackResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, BlockstackError>;
}
impl<T> BlockstackResultExt<T> for Result<T, BlockstackError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, BlockstackError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for BlockstackError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("blockstack-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Reconciliation(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Execution(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for BlockstackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = Err::<(), _>(anyhow::anyhow!("volume group 'vg0' has 1G free"))
            .structured(ReconciliationError::CreationFailure {
                name: "data".into(),
            })
            .unwrap_err();
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert_eq!(
                    m["error"]["creation-failure"]["name"],
                    Value::String("data".into())
                );
                assert_eq!(m["category"], Value::String("reconciliation".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(m["message"], Value::String("Failed to create 'data'".into()));
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_resize_rejected_message() {
        let error = BlockstackError::new(ReconciliationError::ResizeRejected {
            device: "sdb".into(),
            from: ByteCount(1 << 30),
            to: ByteCount(2 << 30),
        });
        assert_eq!(
            error.kind().to_string(),
            "Device 'sdb' is not resizable (1G -> 2G)"
        );
        assert!(matches!(
            error.kind(),
            ErrorKind::Reconciliation(ReconciliationError::ResizeRejected { .. })
        ));
    }

    #[test]
    fn test_message_context() {
        let error = Err::<(), _>(BlockstackError::new(ReconciliationError::Layout))
            .message("Failed to reconcile pool 'vg0'")
            .unwrap_err();
        assert!(format!("{error:?}").contains("Context:\n    0: Failed to reconcile pool 'vg0'"));
    }
}
