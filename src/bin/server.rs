use tracing::Level;

#[rocket::main]
async fn main() {
    #[cfg(debug_assertions)]
    let level = Some(Level::DEBUG);
    #[cfg(not(debug_assertions))]
    let level = Some(Level::INFO);

    let rocket = match classhub_backend::create(level).await {
        Ok(rocket) => rocket,
        Err(e) => {
            tracing::error!("Error building server: {}", e);
            return;
        }
    };

    if let Err(e) = rocket.launch().await {
        tracing::error!("Error launching server: {}", e);
    }
}
