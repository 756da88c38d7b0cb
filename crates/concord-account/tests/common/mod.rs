//! Shared multi-device scenario helpers.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use concord_circle::Circle;
use concord_core::{CircleName, PeerId};
use concord_testkit::{init_tracing, relay_circle, relay_key_parameters, DeviceFixture};

pub const PASSWORD: &str = "correct horse battery staple";

pub fn device(name: &str, circles: &[&str]) -> DeviceFixture {
    init_tracing();
    DeviceFixture::new(name, circles).unwrap()
}

/// Assert credentials and found every tracked circle.
pub async fn found(founder: &DeviceFixture) {
    assert!(founder.service.assert_user_credentials(PASSWORD).await.unwrap());
    founder.service.reset_to_offering().await.unwrap();
}

/// Take a joiner through key exchange, application, acceptance and
/// countersigning in each of `circles`.
pub async fn admit(sponsor: &DeviceFixture, joiner: &DeviceFixture, circles: &[&str]) {
    relay_key_parameters(sponsor, joiner).await.unwrap();
    assert!(joiner.service.assert_user_credentials(PASSWORD).await.unwrap());
    for circle in circles {
        relay_circle(sponsor, joiner, circle).await.unwrap();
    }
    assert!(joiner.service.join_circle(false).await.unwrap());

    let mut applicants = Vec::new();
    for circle in circles {
        relay_circle(joiner, sponsor, circle).await.unwrap();
        applicants.push(local_id(joiner, circle).await);
    }
    let accepted = sponsor.service.accept_applicants(&applicants).await.unwrap();
    assert_eq!(accepted, circles.len());

    for circle in circles {
        relay_circle(sponsor, joiner, circle).await.unwrap();
        relay_circle(joiner, sponsor, circle).await.unwrap();
    }
}

pub async fn local_id(device: &DeviceFixture, circle: &str) -> PeerId {
    device
        .service
        .local_peer_id(&CircleName::from(circle))
        .await
        .expect("device has an identity in the circle")
}

pub async fn circle(device: &DeviceFixture, circle: &str) -> Circle {
    device.service.circle(&CircleName::from(circle)).await.unwrap()
}

/// Decode the last circle a device posted.
pub async fn last_posted(device: &DeviceFixture, circle: &str) -> Circle {
    let name = CircleName::from(circle);
    let bytes = device.transport.last_circle_bytes(&name).await.unwrap();
    Circle::decode(&bytes, Some(&name)).unwrap()
}
