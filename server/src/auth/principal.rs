//! Identity & handshake adapter.
//!
//! Turns verified token claims into the immutable [`Principal`] a
//! connection carries for its whole life. The class binding comes from the
//! token only; nothing a client sends later can change it.

use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Learner,
    Teacher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub display_label: String,
    pub class_id: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("token subject is empty")]
    EmptySubject,
    #[error("teacher {0} has no class binding")]
    TeacherWithoutClass(String),
}

impl Principal {
    pub fn is_learner(&self) -> bool {
        self.role == Role::Learner
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

impl TryFrom<Claims> for Principal {
    type Error = HandshakeError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        if claims.sub.trim().is_empty() {
            return Err(HandshakeError::EmptySubject);
        }
        let class_id = claims.class_id.filter(|c| !c.trim().is_empty());
        if claims.role == Role::Teacher && class_id.is_none() {
            return Err(HandshakeError::TeacherWithoutClass(claims.sub));
        }
        let display_label = if claims.name.trim().is_empty() {
            claims.sub.clone()
        } else {
            claims.name
        };

        Ok(Principal {
            id: claims.sub,
            role: claims.role,
            display_label,
            class_id,
        })
    }
}
