use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TagPayload {
    #[serde(default)]
    pub name: Option<String>,
}
