//! Subject/session identity: the key every path is derived from

use std::fmt;

use crate::error::SubjectError;

/// A subject and the session being processed. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectSession {
    subject: String,
    session: String,
}

impl SubjectSession {
    pub fn new(subject: impl Into<String>, session: impl Into<String>) -> Result<Self, SubjectError> {
        let subject = subject.into();
        let session = session.into();
        check_id(&subject)?;
        check_id(&session)?;
        Ok(Self { subject, session })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// `{subject}_{session}`, the workspace directory name.
    pub fn key(&self) -> String {
        format!("{}_{}", self.subject, self.session)
    }
}

impl fmt::Display for SubjectSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.subject, self.session)
    }
}

/// Check a session label on its own, before any subject is known.
pub fn validate_session(session: &str) -> Result<(), SubjectError> {
    check_id(session)
}

/// Identifiers are spliced into paths and remote shell arguments.
fn check_id(id: &str) -> Result<(), SubjectError> {
    let reason = if id.is_empty() {
        Some("empty")
    } else if id == "." || id == ".." {
        Some("relative path component")
    } else if id.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("contains whitespace")
    } else if id.contains(['\'', '"', '$', '`', ';', '&', '|', '*', '?']) {
        Some("contains shell metacharacters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(SubjectError::InvalidSubject {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_subject_and_session() {
        let s = SubjectSession::new("sub-3010", "ses-01").unwrap();
        assert_eq!(s.key(), "sub-3010_ses-01");
        assert_eq!(s.to_string(), "sub-3010_ses-01");
        assert_eq!(s.subject(), "sub-3010");
        assert_eq!(s.session(), "ses-01");
    }

    #[test]
    fn rejects_unusable_ids() {
        for bad in ["", "..", "sub/01", "sub 01", "sub-01;rm", "sub-$X"] {
            let err = SubjectSession::new(bad, "ses-01").unwrap_err();
            assert!(
                matches!(err, SubjectError::InvalidSubject { .. }),
                "{bad:?} accepted"
            );
        }
        assert!(SubjectSession::new("sub-01", "").is_err());
    }

    #[test]
    fn session_with_command_substitution_is_rejected() {
        assert!(validate_session("ses-01").is_ok());
        for bad in ["ses-01$(touch x)", "ses-01`id`", "ses 01", "../ses-01"] {
            assert!(validate_session(bad).is_err(), "{bad:?} accepted");
        }
    }
}
