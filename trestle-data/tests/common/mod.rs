//! Entities shared by the integration tests.

#![allow(dead_code)]

use trestle_data::Entity;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: u64,
    pub number: String,
    pub open: bool,
    pub total: u32,
}

impl Order {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            id: 0,
            number: number.into(),
            open: true,
            total: 0,
        }
    }

    pub fn with_total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }

    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }
}

impl Entity for Order {
    type Id = u64;
    type Signature = String;

    fn id(&self) -> &u64 {
        &self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn signature(&self) -> String {
        self.number.clone()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
}

impl Customer {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            email: email.into(),
        }
    }
}

impl Entity for Customer {
    type Id = Uuid;
    type Signature = String;

    fn id(&self) -> &Uuid {
        &self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn signature(&self) -> String {
        self.email.to_lowercase()
    }
}
