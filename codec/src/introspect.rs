//! Member enumeration.
//!
//! The engine never inspects record types directly: it asks an [Introspect] implementation
//! which members to walk. [FieldIntrospector] walks every non-transient member.

use crate::{MemberInfo, TypeDescriptor};

/// Supplies the members of a record type, in encoding order.
pub trait Introspect: Send + Sync {
    fn members(&self, ty: &TypeDescriptor) -> Vec<MemberInfo>;
}

/// Walks all declared members (base types first), skipping transient ones.
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldIntrospector;

impl Introspect for FieldIntrospector {
    fn members(&self, ty: &TypeDescriptor) -> Vec<MemberInfo> {
        ty.all_members()
            .iter()
            .filter(|member| !member.is_transient())
            .cloned()
            .collect()
    }
}
