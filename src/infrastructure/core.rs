mod booking_request;
mod calendar;
mod wallet;

use eventstore::ResolvedEvent;

use crate::domain::{
    core::{BookingRequest, Calendar, CoreEvent, Wallet},
    Entity,
};

pub use self::booking_request::*;
pub use self::calendar::*;
pub use self::wallet::*;

use super::EventConvertError;

impl TryFrom<&ResolvedEvent> for CoreEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        let x = value
            .get_original_stream_id()
            .split('-')
            .next()
            .ok_or(EventConvertError)?;
        match x {
            Calendar::ENTITY_NAME => Ok(CoreEvent::CalendarEvent(TryFrom::try_from(value)?)),
            BookingRequest::ENTITY_NAME => {
                Ok(CoreEvent::BookingRequestEvent(TryFrom::try_from(value)?))
            }
            Wallet::ENTITY_NAME => Ok(CoreEvent::WalletEvent(TryFrom::try_from(value)?)),
            _ => Err(EventConvertError),
        }
    }
}
