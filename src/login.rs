//! Automated login strategies, selected by site name.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::action::Action;
use crate::browser::LivePage;
use crate::error::ConfigError;
use crate::executor::execute;
use crate::util::verify_login_page;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The page is not a login page for this site.
    NotApplicable,
    LoggedIn,
    Failed(String),
}

#[async_trait]
pub trait LoginStrategy: Send + Sync {
    fn engine_name(&self) -> &str;
    async fn attempt(&self, page: &dyn LivePage) -> LoginOutcome;
}

/// A username/password form at a known set of URLs.
#[derive(Clone, Debug)]
pub struct FormLogin {
    name: String,
    login_urls: Vec<String>,
    username_selector: String,
    password_selector: String,
    submit_selector: String,
    username_env: String,
    password_env: String,
    credentials: Option<(String, String)>,
    settle: Duration,
}

impl FormLogin {
    pub fn new(
        name: &str,
        login_urls: &[&str],
        selectors: [&str; 3],
        env_prefix: &str,
    ) -> Self {
        let [username, password, submit] = selectors;
        Self {
            name: name.to_string(),
            login_urls: login_urls.iter().map(|u| u.to_string()).collect(),
            username_selector: username.to_string(),
            password_selector: password.to_string(),
            submit_selector: submit.to_string(),
            username_env: format!("{env_prefix}_USERNAME"),
            password_env: format!("{env_prefix}_PASSWORD"),
            credentials: None,
            settle: Duration::from_secs(3),
        }
    }

    /// Use these credentials instead of reading the environment.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn credentials(&self) -> Result<(String, String), String> {
        if let Some(c) = &self.credentials {
            return Ok(c.clone());
        }
        let user = env::var(&self.username_env)
            .map_err(|_| format!("{} is not set", self.username_env))?;
        let pass = env::var(&self.password_env)
            .map_err(|_| format!("{} is not set", self.password_env))?;
        Ok((user, pass))
    }
}

#[async_trait]
impl LoginStrategy for FormLogin {
    fn engine_name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, page: &dyn LivePage) -> LoginOutcome {
        let url = match page.url().await {
            Ok(u) => u,
            Err(e) => return LoginOutcome::Failed(e.to_string()),
        };
        if !verify_login_page(&url, &self.login_urls) {
            return LoginOutcome::NotApplicable;
        }
        let (user, pass) = match self.credentials() {
            Ok(c) => c,
            Err(e) => return LoginOutcome::Failed(e),
        };
        debug!(engine = %self.name, url = %url, "filling login form");

        let steps = [
            Action::Fill {
                selector: self.username_selector.clone(),
                value: user,
            },
            Action::Fill {
                selector: self.password_selector.clone(),
                value: pass,
            },
            Action::Click {
                selector: self.submit_selector.clone(),
            },
        ];
        for step in &steps {
            let outcome = execute(page, step).await;
            if let Some(reason) = outcome.failure_reason {
                return LoginOutcome::Failed(reason);
            }
        }
        let _ = page.wait_for_network_idle(self.settle).await;

        match page.url().await {
            Ok(after) if verify_login_page(&after, &self.login_urls) => {
                LoginOutcome::Failed("still on the login page after submitting".into())
            }
            Ok(after) => {
                info!(engine = %self.name, url = %after, "logged in");
                LoginOutcome::LoggedIn
            }
            Err(e) => LoginOutcome::Failed(e.to_string()),
        }
    }
}

/// The built-in sites.
pub fn registry() -> Vec<FormLogin> {
    vec![
        FormLogin::new(
            "instagram",
            &[
                "https://www.instagram.com/",
                "https://www.instagram.com/accounts/login/",
            ],
            ["input[name='username']", "input[name='password']", "button[type='submit']"],
            "INSTAGRAM",
        ),
        FormLogin::new(
            "facebook",
            &["https://www.facebook.com/", "https://www.facebook.com/login/"],
            ["#email", "#pass", "button[name='login']"],
            "FACEBOOK",
        ),
        FormLogin::new(
            "linkedin",
            &[
                "https://www.linkedin.com/login/",
                "https://www.linkedin.com/uas/login/",
                "https://www.linkedin.com/checkpoint/lg/login/",
            ],
            ["#username", "#password", "button[type='submit']"],
            "LINKEDIN",
        ),
    ]
}

pub fn available_sites() -> Vec<String> {
    registry().into_iter().map(|l| l.name).collect()
}

/// Look up strategies by name, failing on the first unknown one.
pub fn resolve_sites<S: AsRef<str>>(
    names: &[S],
) -> Result<Vec<Arc<dyn LoginStrategy>>, ConfigError> {
    let all = registry();
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            all.iter()
                .find(|l| l.name.eq_ignore_ascii_case(name))
                .map(|l| Arc::new(l.clone()) as Arc<dyn LoginStrategy>)
                .ok_or_else(|| ConfigError::UnknownLoginSite {
                    site: name.to_string(),
                    available: available_sites(),
                })
        })
        .collect()
}
