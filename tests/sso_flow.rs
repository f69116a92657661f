//! Full browser round trip against real listeners: protected client path,
//! authenticator login, ticket redemption and single sign-on into a second
//! visit.

use anyhow::{anyhow, Result};
use fastcas::{
    api,
    cache::CacheManager,
    protocol::{
        Account, Application, AuthenticatorEngine, ClientEngine, CookieConfig,
        HttpTicketValidator, NoopCoprocessor, ProtocolConfig, StaticSecurityConfigurer,
        AUTHENTICATOR_COOKIE, CLIENT_COOKIE,
    },
    secure::{CredentialsSecurer, SecureConfig, StoredCredentials},
};
use rsa::{pkcs8::DecodePublicKey, Pkcs1v15Encrypt, RsaPublicKey};
use reqwest::{header, redirect::Policy, Client, Response, StatusCode};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

const PASSWORD: &str = "correct horse";
const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

struct Nodes {
    sso: String,
    portal: String,
}

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

async fn start() -> Result<Nodes> {
    let sso_listener = TcpListener::bind("127.0.0.1:0").await?;
    let portal_listener = TcpListener::bind("127.0.0.1:0").await?;
    let sso = format!("http://{}", sso_listener.local_addr()?);
    let portal = format!("http://{}", portal_listener.local_addr()?);

    // authenticator
    let caches = CacheManager::in_memory("sso");
    let securer = CredentialsSecurer::new(
        SecureConfig::new(SecretString::from("private-salt"))
            .with_pool_size(2)
            .with_key_bits(512),
        &caches,
    )?;
    let public_salt = CredentialsSecurer::generate_public_salt()?;
    let signature = securer.hash_credentials(PASSWORD, &hex::decode(&public_salt)?);
    let configurer = StaticSecurityConfigurer::default()
        .with_application(Application {
            name: "portal".to_string(),
            base_uri: portal.clone(),
        })
        .with_account(Account {
            principal: "alice".to_string(),
            stored: StoredCredentials {
                credentials: Some(signature),
                public_salt: Some(public_salt),
            },
            roles: vec!["admin".to_string()],
            applications: vec!["portal".to_string()],
            ..Account::default()
        });
    let engine = AuthenticatorEngine::new(
        ProtocolConfig::new("fastcas", &sso, &sso),
        &caches,
        Arc::new(securer),
        Arc::new(configurer),
        Arc::new(NoopCoprocessor),
    );
    let router = api::authenticator_router(Arc::new(engine), caches);
    tokio::spawn(async move { axum::serve(sso_listener, router.into_make_service()).await });

    // relying client, with its own cache namespace
    let caches = CacheManager::in_memory("portal");
    let config = ProtocolConfig::new("portal", &sso, &portal)
        .with_cookie(CookieConfig::new(CLIENT_COOKIE))
        .with_validate_timeout(Duration::from_secs(2));
    let validator = HttpTicketValidator::new(&config.validate_url(), config.validate_timeout())?;
    let engine = ClientEngine::new(
        config,
        &caches,
        Arc::new(validator),
        Arc::new(StaticSecurityConfigurer::default()),
        Arc::new(NoopCoprocessor),
    );
    let router = api::client_router(Arc::new(engine), caches);
    tokio::spawn(async move { axum::serve(portal_listener, router.into_make_service()).await });

    Ok(Nodes { sso, portal })
}

fn browser() -> Result<Client> {
    Ok(Client::builder()
        .redirect(Policy::none())
        .user_agent(BROWSER)
        .build()?)
}

fn location(response: &Response) -> Result<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no redirect from {}", response.url()))
}

/// `name=value` pair of the cookie `name` set by `response`.
fn cookie(response: &Response, name: &str) -> Result<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(&format!("{name}=")))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cookie {name} not set by {}", response.url()))
}

fn encrypt(public_hex: &str, plaintext: &str) -> Result<String> {
    let public = RsaPublicKey::from_public_key_der(&hex::decode(public_hex)?)?;
    let ciphertext = public.encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, plaintext.as_bytes())?;
    Ok(hex::encode(ciphertext))
}

fn form(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Log in at the authenticator and return the redirect back to the portal
/// together with the authenticator session cookie.
async fn login(client: &Client, nodes: &Nodes, redirect_url: &str) -> Result<(String, String)> {
    let applied = client
        .post(format!("{}/secret/apply", nodes.sso))
        .send()
        .await?;
    assert_eq!(applied.status(), StatusCode::OK);
    let pre_login = cookie(&applied, AUTHENTICATOR_COOKIE)?;
    let body: serde_json::Value = applied.json().await?;
    let secret = body["data"]["secret"]
        .as_str()
        .ok_or_else(|| anyhow!("no secret in {body}"))?;
    let credentials = encrypt(secret, PASSWORD)?;

    let response = client
        .post(format!("{}/login", nodes.sso))
        .header(header::COOKIE, &pre_login)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(form(&[
            ("service", "portal"),
            ("redirect_url", redirect_url),
            ("principal", "alice"),
            ("credentials", &credentials),
        ]))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let sso_cookie = cookie(&response, AUTHENTICATOR_COOKIE)?;
    assert_ne!(sso_cookie, pre_login, "login must rotate the session id");
    Ok((location(&response)?, sso_cookie))
}

#[tokio::test]
async fn browser_signs_in_and_returns_to_the_remembered_page() -> Result<()> {
    if !can_bind_localhost() {
        return Ok(());
    }
    let nodes = start().await?;
    let client = browser()?;

    // 1. protected page sends the browser to the authenticator
    let first = client
        .get(format!("{}/reports/2024", nodes.portal))
        .header(header::ACCEPT, "text/html")
        .send()
        .await?;
    assert_eq!(first.status(), StatusCode::FOUND);
    let pre_login = cookie(&first, CLIENT_COOKIE)?;
    let login_url = url::Url::parse(&location(&first)?)?;
    assert_eq!(login_url.path(), "/login");
    let redirect_url = login_url
        .query_pairs()
        .find(|(name, _)| name == "redirect_url")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| anyhow!("no redirect_url in {login_url}"))?;
    assert_eq!(redirect_url, format!("{}/authenticator", nodes.portal));

    // 2. the login page itself has no UI, only directions
    let page = client.get(login_url.as_str()).send().await?;
    assert_eq!(page.status(), StatusCode::UNAUTHORIZED);
    let page: serde_json::Value = page.json().await?;
    assert_eq!(page["code"], "UNAUTHC");
    assert!(page["data"]["apply_secret_url"].is_string());

    // 3. login and come back with a ticket
    let (callback, _sso_cookie) = login(&client, &nodes, &redirect_url).await?;
    assert!(callback.starts_with(&format!("{}/authenticator?grantTicket=ST-", nodes.portal)));
    assert!(callback.ends_with("&principal=alice"));

    // 4. the portal redeems the ticket and returns to the remembered page
    let redeemed = client
        .get(&callback)
        .header(header::COOKIE, &pre_login)
        .send()
        .await?;
    assert_eq!(redeemed.status(), StatusCode::FOUND);
    assert_eq!(location(&redeemed)?, format!("{}/reports/2024", nodes.portal));
    let portal_cookie = cookie(&redeemed, CLIENT_COOKIE)?;
    assert_ne!(portal_cookie, pre_login, "redemption must rotate the session id");

    // 5. the protected page now answers
    let page = client
        .get(format!("{}/reports/2024", nodes.portal))
        .header(header::COOKIE, &portal_cookie)
        .send()
        .await?;
    assert_eq!(page.status(), StatusCode::OK);
    let page: serde_json::Value = page.json().await?;
    assert_eq!(page["data"]["principal"]["principal"], "alice");
    assert_eq!(page["data"]["path"], "/reports/2024");

    // 6. the ticket was single use
    let replay = client
        .post(format!("{}/validate", nodes.sso))
        .json(&serde_json::json!({
            "ticket": url::Url::parse(&callback)?
                .query_pairs()
                .find(|(name, _)| name == "grantTicket")
                .map(|(_, value)| value.into_owned()),
            "application": "portal",
        }))
        .send()
        .await?;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn authenticated_session_signs_in_without_credentials() -> Result<()> {
    if !can_bind_localhost() {
        return Ok(());
    }
    let nodes = start().await?;
    let client = browser()?;
    let redirect_url = format!("{}/authenticator", nodes.portal);
    let (_callback, sso_cookie) = login(&client, &nodes, &redirect_url).await?;

    let again = client
        .get(format!("{}/login", nodes.sso))
        .query(&[("service", "portal"), ("redirect_url", redirect_url.as_str())])
        .header(header::COOKIE, &sso_cookie)
        .header(header::ACCEPT, "text/html")
        .send()
        .await?;
    assert_eq!(again.status(), StatusCode::FOUND);
    assert!(location(&again)?.contains("grantTicket=ST-"));
    Ok(())
}

#[tokio::test]
async fn api_callers_get_an_envelope_instead_of_a_redirect() -> Result<()> {
    if !can_bind_localhost() {
        return Ok(());
    }
    let nodes = start().await?;
    let response = Client::builder()
        .redirect(Policy::none())
        .build()?
        .get(format!("{}/reports", nodes.portal))
        .header(header::ACCEPT, "application/json")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["code"], "UNAUTHC");
    assert_eq!(body["data"]["service_role"], "iam_client");
    Ok(())
}

#[tokio::test]
async fn logout_ends_both_sessions() -> Result<()> {
    if !can_bind_localhost() {
        return Ok(());
    }
    let nodes = start().await?;
    let client = browser()?;
    let (callback, sso_cookie) =
        login(&client, &nodes, &format!("{}/authenticator", nodes.portal)).await?;
    let redeemed = client.get(&callback).send().await?;
    assert_eq!(redeemed.status(), StatusCode::FOUND);
    let portal_cookie = cookie(&redeemed, CLIENT_COOKIE)?;

    // the client hands the browser to the authenticator logout
    let logout = client
        .get(format!("{}/logout", nodes.portal))
        .header(header::COOKIE, &portal_cookie)
        .header(header::ACCEPT, "text/html")
        .send()
        .await?;
    assert_eq!(logout.status(), StatusCode::FOUND);
    let sso_logout = location(&logout)?;
    assert!(sso_logout.starts_with(&format!("{}/logout?service=portal", nodes.sso)));

    let closed = client
        .get(&sso_logout)
        .header(header::COOKIE, &sso_cookie)
        .header(header::ACCEPT, "text/html")
        .send()
        .await?;
    assert_eq!(closed.status(), StatusCode::FOUND);
    assert_eq!(location(&closed)?, format!("{}/", nodes.portal));

    // neither the portal nor the authenticator session survives
    let page = client
        .get(format!("{}/reports/2024", nodes.portal))
        .header(header::COOKIE, &portal_cookie)
        .header(header::ACCEPT, "text/html")
        .send()
        .await?;
    assert_eq!(page.status(), StatusCode::FOUND);
    let login_url = location(&page)?;
    assert!(login_url.starts_with(&format!("{}/login?", nodes.sso)));

    let again = client
        .get(&login_url)
        .header(header::COOKIE, &sso_cookie)
        .header(header::ACCEPT, "text/html")
        .send()
        .await?;
    assert_eq!(again.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
