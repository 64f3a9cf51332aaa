//! Signs a user in through the device authorization grant and keeps the credential on disk.
//!
//! Set `TWITCH_CLIENT_ID` to a public client registered for the device flow. Running the demo a
//! second time reuses the stored credential instead of asking for another approval.

// std
use std::{env, sync::Arc};
// crates.io
use color_eyre::Result;
// self
use device_flow_broker::{
	CancellationToken,
	auth::ScopeSet,
	flows::BrokerBuilder,
	provider::ProviderDescriptor,
	state::store_key,
	store::FileStore,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let client_id = env::var("TWITCH_CLIENT_ID")?;
	let store = FileStore::open(env::temp_dir().join("device-flow-broker"), &store_key(&client_id))?;
	let broker =
		BrokerBuilder::new(Arc::new(store), ProviderDescriptor::twitch()?, client_id.as_str())
			.build()?;

	if let Some(token) = broker.user_access_token().await? {
		println!("Already signed in as {} with scopes `{}`.", token.user_id, token.scopes().join(' '));

		return Ok(());
	}

	let state = broker
		.sign_in(
			ScopeSet::new(["chat:read"])?,
			vec!["chat".into()],
			CancellationToken::new(),
			|grant| {
				println!(
					"Open {} and enter the code {} within {}.",
					grant.verification_uri, grant.user_code, grant.expires_in
				);
			},
		)
		.await?;

	println!("Signed in as {}.", state.user_id);

	Ok(())
}
