use std::sync::Arc;

use calbot::bot::{self, BotContext};
use calbot::gemini::GeminiTranslator;
use calbot::google_api::calendar::GoogleCalendar;
use calbot::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env()?;
    log::info!(
        "starting calbot (tz {}, calendar {})",
        settings.tz,
        settings.calendar_id
    );

    let store = GoogleCalendar::new(settings.credentials.web.clone(), settings.token.clone());
    let translator = GeminiTranslator::new(settings.gemini_api_key.clone());
    let ctx = Arc::new(BotContext::new(
        translator,
        Box::new(store),
        settings.tz,
        settings.calendar_id.clone(),
    ));

    bot::run(ctx, &settings.telegram_token).await;
    Ok(())
}
