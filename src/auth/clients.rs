use std::fmt;

use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, Scope, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{profiles::SignedIn, AppResult, ChatError, Config, GetField};

type HappyClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn auth_url(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "https://accounts.google.com/o/oauth2/auth",
            Github => "https://github.com/login/oauth/authorize",
        }
    }

    fn token_url(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "https://oauth2.googleapis.com/token",
            Github => "https://github.com/login/oauth/access_token",
        }
    }

    pub fn userinfo_url(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "https://www.googleapis.com/oauth2/v2/userinfo",
            Github => "https://api.github.com/user",
        }
    }

    pub fn scopes(&self) -> Vec<Scope> {
        use ClientProvider::*;
        let scopes: &[&str] = match self {
            Google => &["openid", "profile", "email"],
            Github => &["read:user", "user:email"],
        };
        scopes.iter().map(|s| Scope::new(s.to_string())).collect()
    }

    /// Turns the provider's userinfo document into a profile seed. Ids are
    /// namespaced by provider so two providers can never collide.
    pub fn parse_userinfo(&self, body: &Value) -> AppResult<SignedIn> {
        use ClientProvider::*;
        let optional = |field: &str| body.get_str_field(field).ok().filter(|v| !v.is_empty());

        let signed_in = match self {
            Google => SignedIn {
                id: format!("google:{}", body.get_str_field("id")?),
                display_name: optional("name"),
                email: optional("email"),
                photo_url: optional("picture"),
            },
            Github => {
                let id = body
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or(ChatError::SignIn(format!("expected numeric id in {body}")))?;
                SignedIn {
                    id: format!("github:{id}"),
                    display_name: optional("name").or_else(|| optional("login")),
                    email: optional("email"),
                    photo_url: optional("avatar_url"),
                }
            }
        };
        Ok(signed_in)
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Default)]
pub struct Clients {
    google_client: Option<HappyClient>,
    github_client: Option<HappyClient>,
}

impl Clients {
    /// Reads `{ "google": { client_id, client_secret }, "github": { ... } }`;
    /// either provider may be left out.
    pub fn from_json(json: Value, config: &Config) -> AppResult<Clients> {
        let client = |provider: ClientProvider| -> AppResult<Option<HappyClient>> {
            let Some(json) = json.get(provider.id()) else {
                return Ok(None);
            };
            let client_id = ClientId::new(json.get_str_field("client_id")?);
            let client_secret = ClientSecret::new(json.get_str_field("client_secret")?);

            let auth_url = AuthUrl::new(provider.auth_url().to_owned())?;
            let token_url = TokenUrl::new(provider.token_url().to_owned())?;
            let redirect_url = RedirectUrl::new(config.redirect_url(provider.id()))?;

            Ok(Some(
                BasicClient::new(client_id)
                .set_client_secret(client_secret)
                .set_auth_uri(auth_url)
                .set_token_uri(token_url)
                .set_redirect_uri(redirect_url)
            ))
        };

        Ok(
            Clients {
                google_client: client(ClientProvider::Google)?,
                github_client: client(ClientProvider::Github)?,
            }
        )
    }

    pub fn get_client(&self, provider: ClientProvider) -> AppResult<HappyClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or(format!("OAuth provider {provider} keys not supplied").into())
    }
}
