//! Kittygram demo server
//!
//! Seeds two owners and a few cats, prints an API token per owner and serves
//! the catalog on http://127.0.0.1:8000.
//!
//! ```text
//! cargo run --example kittygram
//! curl http://127.0.0.1:8000/cats?search=Mu
//! curl -X PATCH -H "Authorization: Token <key>" -H "Content-Type: application/json" \
//!      -d '{"color": "black"}' http://127.0.0.1:8000/cats/<id>
//! ```

use kittygram::entities::AchievementInput;
use kittygram::prelude::*;
use std::path::Path;
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "demos/kittygram/config/policy.yaml";
const ADDR: &str = "127.0.0.1:8000";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kittygram=debug,tower_http=info")),
        )
        .init();

    let config = if Path::new(CONFIG_PATH).exists() {
        PolicyConfig::from_yaml_file(CONFIG_PATH)?
    } else {
        tracing::warn!("{} not found, using the built-in policy", CONFIG_PATH);
        PolicyConfig::default_config()
    };

    let catalog = InMemoryCatalog::new();
    let tokens = TokenIdentityProvider::new(Arc::new(catalog.clone()));

    let alice = catalog.insert_user(User::new("alice").with_names("Alice", "Liddell"))?;
    let bob = catalog.insert_user(User::new("bob").with_names("Bob", "Marley"))?;

    seed_cats(&catalog, &alice, &bob).await?;

    println!("🐈 Kittygram v{}", env!("CARGO_PKG_VERSION"));
    println!("\n🔑 Tokens:");
    for user in [&alice, &bob] {
        println!("    {:<8} Authorization: Token {}", user.username, tokens.issue(user.id)?);
    }

    println!("\n🌐 Server running on http://{}", ADDR);
    println!("\n📚 Routes:");
    println!("    GET    /                  - API root");
    println!("    GET    /cats              - List cats (?color=&birth_year=&search=&ordering=&page=&limit=)");
    println!("    POST   /cats              - Create a cat (authenticated)");
    println!("    GET    /cats/{{id}}         - Get a cat");
    println!("    PUT    /cats/{{id}}         - Replace a cat (owner only)");
    println!("    PATCH  /cats/{{id}}         - Update a cat (owner only)");
    println!("    DELETE /cats/{{id}}         - Delete a cat (owner only)");
    println!("    GET    /users             - List owners");
    println!("    GET    /users/{{id}}        - Get an owner");
    println!("    GET    /achievements      - List achievements");
    println!("    GET    /achievements/{{id}} - Get an achievement\n");

    ServerBuilder::new()
        .with_config(config)
        .with_catalog(catalog)
        .with_identity_provider(Arc::new(tokens))
        .serve(ADDR)
        .await
}

async fn seed_cats(catalog: &InMemoryCatalog, alice: &User, bob: &User) -> Result<()> {
    let cats = [
        (alice, "Murzik", "grey", 2019, vec!["mouse hunter"]),
        (alice, "Barsik", "ginger", 2021, vec![]),
        (bob, "Mur", "black", 2020, vec!["mouse hunter", "sofa destroyer"]),
        (bob, "hMur", "white", 2018, vec![]),
    ];

    for (owner, name, color, birth_year, achievements) in cats {
        let payload = CatPayload {
            name: name.to_string(),
            color: color.to_string(),
            birth_year,
            achievements: Some(
                achievements
                    .into_iter()
                    .map(|name| AchievementInput {
                        name: name.to_string(),
                    })
                    .collect(),
            ),
        };
        catalog.create(payload, owner.id).await?;
    }

    Ok(())
}
