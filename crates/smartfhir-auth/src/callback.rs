//! Authorization callback parsing.
//!
//! The authorization server sends the user back to the redirect URI with
//! `code` and `state` in the query string. Single-page redirect targets
//! sometimes receive them in the fragment instead (`#/?code=..`), so the
//! fragment is consulted when the query carries nothing.

use url::Url;

use crate::error::{Result, SmartAuthError};

/// Parameters extracted from a callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

/// Parse `callback_url`.
///
/// Returns `Ok(None)` when the URL carries no authorization code, i.e. it
/// is not a callback at all.
///
/// # Errors
///
/// [`SmartAuthError::AuthorizationDenied`] if the server reported an
/// `error`; [`SmartAuthError::UrlParse`] if the URL is malformed.
pub fn parse_callback(callback_url: &str) -> Result<Option<CallbackParams>> {
    let url = match Url::parse(callback_url) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse("http://localhost/")?.join(callback_url)?
        }
        Err(e) => return Err(e.into()),
    };

    let mut params = Params::from_pairs(url.query_pairs());
    if params.is_empty()
        && let Some(fragment) = url.fragment()
    {
        let fragment = fragment.trim_start_matches('/').trim_start_matches('?');
        params = Params::from_pairs(url::form_urlencoded::parse(fragment.as_bytes()));
    }

    if let Some(error) = params.error {
        return Err(SmartAuthError::AuthorizationDenied {
            error,
            description: params.error_description,
            state: params.state,
        });
    }

    Ok(params
        .code
        .filter(|c| !c.is_empty())
        .map(|code| CallbackParams {
            code,
            state: params.state,
        }))
}

#[derive(Default)]
struct Params {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl Params {
    fn from_pairs<'a>(
        pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
    ) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }

    fn is_empty(&self) -> bool {
        self.code.is_none() && self.state.is_none() && self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
