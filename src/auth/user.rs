use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The actor behind a call, as resolved by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub roles: Vec<String>,
}

impl User {
    pub fn new(id: Uuid, roles: &[&str]) -> Self {
        Self {
            id,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn passenger(id: Uuid) -> Self {
        Self::new(id, &["passenger"])
    }

    pub fn driver(id: Uuid) -> Self {
        Self::new(id, &["driver"])
    }

    pub fn staff(id: Uuid) -> Self {
        Self::new(id, &["staff"])
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, &["admin"])
    }

    pub fn new_system_user() -> Self {
        Self::new(Uuid::nil(), &["system"])
    }

    pub fn has_role(&self, role: String) -> bool {
        self.roles.iter().any(|x| x == &role)
    }

    pub fn is_privileged(&self) -> bool {
        ["staff", "admin", "system"]
            .iter()
            .any(|role| self.has_role(role.to_string()))
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id.to_string())
            .add_attribute_getter("roles", |recv: &User| recv.roles.clone())
            .add_method("has_role", User::has_role)
    }

    fn get_polar_class() -> oso::Class {
        let builder = User::get_polar_class_builder();
        builder.build()
    }
}
