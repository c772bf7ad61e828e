//! Multi-step browser login, expressed as an explicit state machine.
//!
//! Each transition performs the page work for the state it leaves and names
//! the state it enters, so the whole flow is testable against a scripted
//! [`BrowserDriver`] without a real browser. The flow on the happy path:
//!
//! `Start → EmailEntered → AwaitingChallenge → ChallengeReady →
//! CodeSubmitted → Redirecting → SessionEstablished`
//!
//! with `ErrorDetected → EmailEntered` loops while the recovery budget
//! lasts, and an optional `OnboardingDetected → NameSubmitted → Redirecting`
//! detour for accounts hitting first-time setup.

use std::time::Duration;

use rand::seq::IndexedRandom;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, DriverError, PageCondition, Role, Target};
use crate::config::LoginConfig;
use crate::mailbox::{CodeSource, MailboxError};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("browser driver: {0}")]
    Driver(#[from] DriverError),
    #[error("could not reach challenge step after {attempts} error-page recoveries")]
    ChallengeUnreachable { attempts: u32 },
    #[error("challenge input did not appear within {0:?}")]
    ChallengeTimeout(Duration),
    #[error("no redirect to the destination within {0:?}")]
    RedirectTimeout(Duration),
    #[error("verification code: {0}")]
    Code(#[from] MailboxError),
    #[error("page element missing: {0}")]
    MissingElement(&'static str),
}

/// Enumerated states of the login flow. `SessionEstablished` is the sole
/// terminal state; failed and timed-out runs leave the loop as typed
/// [`LoginError`]s at the transition that detected them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Start,
    EmailEntered,
    AwaitingChallenge,
    ChallengeReady,
    ErrorDetected,
    CodeSubmitted,
    Redirecting,
    OnboardingDetected,
    NameSubmitted,
    SessionEstablished,
}

/// Drives one account through the login flow on a caller-provided driver.
///
/// The session leaves the driver parked on the post-login destination page;
/// token extraction reads cookies and URL from that same driver afterwards.
pub struct LoginSession<'a> {
    config: &'a LoginConfig,
    codes: &'a dyn CodeSource,
    email: &'a str,
    mailbox_account_id: u64,
}

impl<'a> LoginSession<'a> {
    pub fn new(
        config: &'a LoginConfig,
        codes: &'a dyn CodeSource,
        email: &'a str,
        mailbox_account_id: u64,
    ) -> Self {
        Self {
            config,
            codes,
            email,
            mailbox_account_id,
        }
    }

    /// Runs the state machine to a terminal state. On success the driver is
    /// left on the destination page.
    pub async fn run(&self, driver: &mut dyn BrowserDriver) -> Result<(), LoginError> {
        let cfg = self.config;
        let mut state = LoginState::Start;
        let mut recoveries = 0u32;
        // Set when the challenge code is submitted; shared across onboarding
        // detours so the overall redirect wait stays bounded.
        let mut redirect_deadline = Instant::now() + cfg.redirect_timeout;

        loop {
            debug!(email = self.email, state = ?state, "login step");
            state = match state {
                LoginState::Start => {
                    driver.navigate(&cfg.entry_url).await?;
                    sleep(cfg.settle_delay).await;
                    LoginState::EmailEntered
                }

                LoginState::EmailEntered => {
                    if !driver.fill(&Target::field(&cfg.email_field), self.email).await? {
                        return Err(LoginError::MissingElement("email input"));
                    }
                    if !driver
                        .activate(&Target::labeled(Role::Button, &cfg.submit_label))
                        .await?
                    {
                        driver.press_enter().await?;
                    }
                    LoginState::AwaitingChallenge
                }

                LoginState::AwaitingChallenge => {
                    // Race the challenge input against the two failure
                    // signals; first to settle decides the transition.
                    let branches = [
                        PageCondition::TargetVisible(Target::field(&cfg.challenge_field)),
                        PageCondition::TargetVisible(Target::labeled(
                            Role::Link,
                            &cfg.retry_label,
                        )),
                        PageCondition::TextPresent(cfg.dead_end_text.clone()),
                    ];
                    match driver.wait_any(&branches, cfg.challenge_timeout).await? {
                        Some(0) => LoginState::ChallengeReady,
                        Some(_) => LoginState::ErrorDetected,
                        None => {
                            // Timeout with no signal: the error page may have
                            // rendered without tripping the race, check once.
                            let error_signs = [
                                PageCondition::TargetVisible(Target::labeled(
                                    Role::Link,
                                    &cfg.retry_label,
                                )),
                                PageCondition::TextPresent(cfg.dead_end_text.clone()),
                            ];
                            if driver
                                .wait_any(&error_signs, Duration::from_secs(1))
                                .await?
                                .is_some()
                            {
                                LoginState::ErrorDetected
                            } else {
                                return Err(LoginError::ChallengeTimeout(cfg.challenge_timeout));
                            }
                        }
                    }
                }

                LoginState::ErrorDetected => {
                    recoveries += 1;
                    if recoveries > cfg.max_retries {
                        warn!(
                            email = self.email,
                            attempts = recoveries,
                            "error-page recovery budget exhausted"
                        );
                        return Err(LoginError::ChallengeUnreachable {
                            attempts: recoveries,
                        });
                    }
                    warn!(
                        email = self.email,
                        attempt = recoveries,
                        max = cfg.max_retries,
                        "error page shown, recovering"
                    );
                    // Prefer the in-page retry affordance; a fresh navigation
                    // to the entry page works either way.
                    if !driver
                        .activate(&Target::labeled(Role::Any, &cfg.retry_label))
                        .await?
                    {
                        driver.navigate(&cfg.entry_url).await?;
                    }
                    sleep(cfg.settle_delay).await;
                    LoginState::EmailEntered
                }

                LoginState::ChallengeReady => {
                    // Give the OTP mail time to land before the first poll.
                    sleep(cfg.code_delivery_grace).await;
                    let code = self.codes.fetch_code(self.mailbox_account_id).await?;
                    debug!(email = self.email, "verification code retrieved");
                    if !driver
                        .fill(&Target::field(&cfg.challenge_field), &code)
                        .await?
                    {
                        return Err(LoginError::MissingElement("challenge input"));
                    }
                    if !driver
                        .activate(&Target::labeled(Role::Button, &cfg.verify_label))
                        .await?
                    {
                        driver.press_enter().await?;
                    }
                    redirect_deadline = Instant::now() + cfg.redirect_timeout;
                    LoginState::CodeSubmitted
                }

                LoginState::CodeSubmitted => {
                    sleep(cfg.settle_delay).await;
                    LoginState::Redirecting
                }

                LoginState::Redirecting => {
                    let url = driver.current_url().await?;
                    if url.contains(&cfg.destination_marker) {
                        LoginState::SessionEstablished
                    } else if url.contains(&cfg.onboarding_marker) {
                        LoginState::OnboardingDetected
                    } else if Instant::now() >= redirect_deadline {
                        debug!(email = self.email, url = %url, "redirect wait expired");
                        return Err(LoginError::RedirectTimeout(cfg.redirect_timeout));
                    } else {
                        sleep(cfg.redirect_poll).await;
                        LoginState::Redirecting
                    }
                }

                LoginState::OnboardingDetected => {
                    info!(email = self.email, "first-time setup page, completing onboarding");
                    sleep(cfg.settle_delay).await;
                    let name = synthesize_display_name();
                    if !driver.fill(&Target::FirstEditable, &name).await? {
                        driver.type_text(&name).await?;
                    }
                    let mut activated = false;
                    for label in &cfg.onboarding_continue_labels {
                        if driver
                            .activate(&Target::labeled(Role::Button, label))
                            .await?
                        {
                            activated = true;
                            break;
                        }
                    }
                    if !activated {
                        driver.press_enter().await?;
                    }
                    LoginState::NameSubmitted
                }

                LoginState::NameSubmitted => {
                    sleep(cfg.settle_delay).await;
                    LoginState::Redirecting
                }

                LoginState::SessionEstablished => {
                    info!(email = self.email, "destination reached, session established");
                    // Let the application finish setting its cookies.
                    sleep(cfg.post_login_grace).await;
                    return Ok(());
                }
            };
        }
    }
}

const FIRST_NAMES: &[&str] = &[
    "Alex", "Jordan", "Taylor", "Morgan", "Casey", "Riley", "Avery", "Quinn", "Jamie", "Drew",
];
const LAST_NAMES: &[&str] = &[
    "Chen", "Smith", "Garcia", "Kim", "Patel", "Novak", "Rossi", "Tanaka", "Weber", "Silva",
];

/// A plausible display name for onboarding pages that demand one.
fn synthesize_display_name() -> String {
    let mut rng = rand::rng();
    let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("Alex");
    let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("Chen");
    format!("{first} {last}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ScriptedDriver, StaticCodes};

    fn config() -> LoginConfig {
        LoginConfig::new("https://auth.example.com/signin")
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reaches_destination() {
        crate::testkit::init_tracing();
        let config = config();
        let codes = StaticCodes("424242");
        let mut driver = ScriptedDriver::new()
            .with_waits([Some(0)])
            .with_urls(["https://app.example.com/u/0/cid/team-9?csesidx=3"]);
        let record = driver.record();

        let session = LoginSession::new(&config, &codes, "dep1@example.com", 7);
        session.run(&mut driver).await.unwrap();

        let record = record.lock();
        assert_eq!(record.action_count("navigate"), 1);
        assert!(
            record
                .actions
                .contains(&"fill:field:email=dep1@example.com".to_string())
        );
        assert!(record.actions.contains(&"fill:field:pinInput=424242".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn three_error_pages_within_budget_still_succeed() {
        let config = config();
        let codes = StaticCodes("424242");
        // Error branch settles three times before the challenge appears.
        let mut driver = ScriptedDriver::new()
            .with_waits([Some(1), Some(2), Some(1), Some(0)])
            .with_urls(["https://app.example.com/u/0/cid/team-9?csesidx=3"]);
        let record = driver.record();

        let session = LoginSession::new(&config, &codes, "dep1@example.com", 7);
        session.run(&mut driver).await.unwrap();

        let record = record.lock();
        // One email submission per entry-page visit: initial + 3 recoveries.
        assert_eq!(record.action_count("fill:field:email"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn error_pages_beyond_budget_fail_with_exhaustion() {
        let mut config = config();
        config.max_retries = 2;
        let codes = StaticCodes("424242");
        let mut driver = ScriptedDriver::new().with_waits([Some(1), Some(1), Some(1)]);

        let session = LoginSession::new(&config, &codes, "dep1@example.com", 7);
        let err = session.run(&mut driver).await.unwrap_err();
        assert!(matches!(
            err,
            LoginError::ChallengeUnreachable { attempts: 3 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_never_appearing_times_out() {
        let config = config();
        let codes = StaticCodes("424242");
        // Neither the challenge input nor any error sign ever settles.
        let mut driver = ScriptedDriver::new();

        let session = LoginSession::new(&config, &codes, "dep1@example.com", 7);
        let err = session.run(&mut driver).await.unwrap_err();
        assert!(matches!(err, LoginError::ChallengeTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_never_reaching_destination_times_out() {
        let config = config();
        let codes = StaticCodes("424242");
        let mut driver = ScriptedDriver::new()
            .with_waits([Some(0)])
            .with_urls(["https://auth.example.com/challenge"]);

        let session = LoginSession::new(&config, &codes, "dep1@example.com", 7);
        let err = session.run(&mut driver).await.unwrap_err();
        assert!(matches!(err, LoginError::RedirectTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn onboarding_detour_resumes_redirecting() {
        let config = config();
        let codes = StaticCodes("424242");
        let mut driver = ScriptedDriver::new().with_waits([Some(0)]).with_urls([
            "https://app.example.com/admin/create",
            "https://app.example.com/u/0/cid/team-9?csesidx=3",
        ]);
        let record = driver.record();

        let session = LoginSession::new(&config, &codes, "dep1@example.com", 7);
        session.run(&mut driver).await.unwrap();

        let record = record.lock();
        assert_eq!(record.action_count("fill:first-editable"), 1);
        assert!(
            record
                .actions
                .iter()
                .any(|a| a.starts_with("activate:labeled:Agree and continue"))
        );
    }

    #[test]
    fn synthesized_names_have_two_parts() {
        let name = synthesize_display_name();
        assert_eq!(name.split_whitespace().count(), 2);
    }
}
