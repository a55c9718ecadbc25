use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{upstream_error, Error};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    /// User services wrap the record under different keys.
    fn from_response(data: &Value) -> Self {
        let record = ["data", "user", "passenger", "driver"]
            .iter()
            .find_map(|key| data.get(*key).filter(|v| v.is_object()))
            .unwrap_or(data);

        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            name: text("name"),
            phone: text("phone").or_else(|| text("phoneNumber")),
        }
    }
}

/// Identity lookups owned by the user service.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_passenger(&self, id: Uuid) -> Result<Option<Contact>, Error>;

    async fn find_driver(&self, id: Uuid) -> Result<Option<Contact>, Error>;
}

pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn lookup(&self, kind: &str, id: Uuid) -> Result<Option<Contact>, Error> {
        let url = format!("{}/{}/{}", self.base_url, kind, id);
        let res = self.client.get(url).send().await?;

        let status_code = res.status().as_u16();

        if status_code == 404 {
            return Ok(None);
        } else if status_code != 200 {
            return Err(upstream_error());
        }

        let data: Value = res.json().await?;

        Ok(Some(Contact::from_response(&data)))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn find_passenger(&self, id: Uuid) -> Result<Option<Contact>, Error> {
        self.lookup("passengers", id).await
    }

    async fn find_driver(&self, id: Uuid) -> Result<Option<Contact>, Error> {
        self.lookup("drivers", id).await
    }
}

#[derive(Default)]
pub struct NullDirectory;

#[async_trait]
impl Directory for NullDirectory {
    async fn find_passenger(&self, _: Uuid) -> Result<Option<Contact>, Error> {
        Ok(None)
    }

    async fn find_driver(&self, _: Uuid) -> Result<Option<Contact>, Error> {
        Ok(None)
    }
}

#[test]
fn contact_from_wrapped_response_test() {
    let wrapped = serde_json::json!({ "data": { "name": "Abebe", "phone": "+251911223344" } });
    let flat = serde_json::json!({ "name": "Sara", "phoneNumber": "+251922334455" });

    assert_eq!(
        Contact::from_response(&wrapped),
        Contact {
            name: Some("Abebe".into()),
            phone: Some("+251911223344".into())
        }
    );
    assert_eq!(Contact::from_response(&flat).phone, Some("+251922334455".into()));
}
