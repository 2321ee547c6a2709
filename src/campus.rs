use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::HTTP_TIMEOUT;

/// Ceiling on portal logins before a run gives up and exits without
/// touching DNS.
pub(crate) const MAX_LOGIN_ATTEMPTS: usize = 5;

const PROBE_URL: &str = "https://www.baidu.com";
const PORTAL_URL: &str = "http://192.168.9.8/include/auth_action.php";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Form the portal expects on its auth endpoint. Everything but the
/// credentials is fixed by the portal.
#[derive(Serialize)]
struct LoginForm<'a> {
    action: &'static str,
    username: &'a str,
    password: &'a str,
    ac_id: &'static str,
    user_mac: &'static str,
    user_ip: &'static str,
    nas_ip: &'static str,
    save_me: &'static str,
    domain: &'static str,
    ajax: &'static str,
}

impl<'a> LoginForm<'a> {
    fn new(username: &'a str, password: &'a str) -> Self {
        LoginForm {
            action: "login",
            username,
            password,
            ac_id: "1",
            user_mac: "",
            user_ip: "",
            nas_ip: "",
            save_me: "0",
            domain: "@uestc",
            ajax: "1",
        }
    }
}

/// Returns true once the outside network answers, submitting a portal login
/// after each failed probe. Gives up after [`MAX_LOGIN_ATTEMPTS`] logins.
pub(crate) fn ensure_online(username: &str, password: &str) -> bool {
    retry_until_online(probe, || login(username, password), MAX_LOGIN_ATTEMPTS)
}

fn retry_until_online(
    mut probe: impl FnMut() -> bool,
    mut login: impl FnMut(),
    max_logins: usize,
) -> bool {
    for attempt in 0..max_logins {
        if probe() {
            return true;
        }
        info!(
            "Network unreachable, trying portal login ({}/{})",
            attempt + 1,
            max_logins
        );
        login();
    }
    false
}

fn probe() -> bool {
    match attohttpc::get(PROBE_URL).timeout(PROBE_TIMEOUT).send() {
        Ok(response) if response.is_success() => true,
        Ok(response) => {
            debug!("Probe answered {}", response.status());
            false
        }
        Err(err) => {
            debug!("Probe failed: {}", err);
            false
        }
    }
}

/// Fires the login form at the portal. The portal's answer carries no useful
/// signal; the next probe decides whether the login worked.
fn login(username: &str, password: &str) {
    let result = attohttpc::post(PORTAL_URL)
        .timeout(HTTP_TIMEOUT)
        .form(&LoginForm::new(username, password))
        .and_then(|request| request.send());
    match result {
        Ok(response) => debug!("Portal answered {}", response.status()),
        Err(err) => debug!("Portal login failed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::retry_until_online;

    #[test]
    fn logs_in_once_per_failed_probe() {
        let mut failures_left = 3;
        let mut logins = 0;
        let online = retry_until_online(
            || {
                if failures_left == 0 {
                    true
                } else {
                    failures_left -= 1;
                    false
                }
            },
            || logins += 1,
            5,
        );
        assert!(online);
        assert_eq!(logins, 3);
    }

    #[test]
    fn gives_up_after_login_ceiling() {
        let mut probes = 0;
        let mut logins = 0;
        let online = retry_until_online(
            || {
                probes += 1;
                false
            },
            || logins += 1,
            5,
        );
        assert!(!online);
        assert_eq!(probes, 5);
        assert_eq!(logins, 5);
    }

    #[test]
    fn skips_login_when_already_online() {
        let mut logins = 0;
        assert!(retry_until_online(|| true, || logins += 1, 5));
        assert_eq!(logins, 0);
    }
}
