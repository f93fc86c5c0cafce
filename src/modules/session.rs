//! Onboarding gate. Nothing a user sends is processed before the bot knows
//! their phone number.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, KeyboardButton, KeyboardMarkup, KeyboardRemove, ReplyMarkup,
};

use crate::common::{BotEnv, Reply};
use crate::models::User;
use crate::utils::ResultExt as _;

pub const PHONE_REQUEST: &str = "Please share your phone number.";
pub const PHONE_SAVED: &str = "Thank you! Your phone number has been saved.";
const SHARE_BUTTON: &str = "Share phone number";

/// Where a user stands in onboarding, derived from the stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    AwaitingPhone(User),
    Active(User),
}

impl SessionState {
    pub fn of(stored: Option<User>) -> Self {
        match stored {
            None => Self::Unregistered,
            Some(user) if !user.has_phone() => Self::AwaitingPhone(user),
            Some(user) => Self::Active(user),
        }
    }
}

#[derive(Debug)]
pub enum Admission {
    /// The message may be processed on behalf of this user.
    Proceed(User),
    /// The message is consumed by onboarding, answer with this reply.
    Stop(Reply),
}

/// Run one message through the gate. `sender` is built from the message,
/// `contact` is the phone number of a shared contact, if any.
///
/// Storage failures are logged and handled as if the write never happened,
/// so the user is asked again on the next message.
pub fn admit(env: &BotEnv, sender: User, contact: Option<&str>) -> Admission {
    let stored = match env.repo.get_user(sender.id) {
        Ok(stored) => stored,
        Err(e) => {
            log::error!("Failed to load user {}: {e}", sender.id);
            return Admission::Stop(phone_request());
        }
    };

    match SessionState::of(stored) {
        SessionState::Unregistered => {
            if env.repo.save_user(&sender).log_ok("Failed to save user").is_some()
            {
                log::info!("New user {} ({})", sender.id, sender.display_name());
                crate::metrics::user_registered();
            }
            Admission::Stop(phone_request())
        }
        SessionState::AwaitingPhone(user) => {
            let Some(phone) = contact.filter(|p| !p.is_empty()) else {
                return Admission::Stop(phone_request());
            };
            match env.repo.set_user_phone(user.id, phone) {
                Ok(true) => Admission::Stop(phone_saved()),
                Ok(false) => {
                    log::warn!("User {} vanished before phone capture", user.id);
                    Admission::Stop(phone_request())
                }
                Err(e) => {
                    log::error!("Failed to save phone of user {}: {e}", user.id);
                    Admission::Stop(phone_request())
                }
            }
        }
        SessionState::Active(user) => Admission::Proceed(user),
    }
}

fn phone_request() -> Reply {
    let keyboard = KeyboardMarkup::new([[
        KeyboardButton::new(SHARE_BUTTON).request(ButtonRequest::Contact)
    ]])
    .resize_keyboard(true)
    .one_time_keyboard(true);
    Reply::Markup(PHONE_REQUEST.to_string(), ReplyMarkup::Keyboard(keyboard))
}

fn phone_saved() -> Reply {
    Reply::Markup(
        PHONE_SAVED.to_string(),
        ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    )
}

/// Handler filter: passes the stored user on for active sessions and
/// answers everything else itself.
pub async fn filter_active(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
) -> Option<User> {
    let sender = User::from_telegram(msg.from()?, &env.config);
    let contact = msg.contact().map(|c| c.phone_number.as_str());
    match admit(&env, sender, contact) {
        Admission::Proceed(user) => Some(user),
        Admission::Stop(reply) => {
            reply
                .send(&bot, msg.chat.id)
                .await
                .log_error("Failed to send onboarding reply");
            None
        }
    }
}
