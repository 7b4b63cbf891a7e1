use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, EventData, ExpectedRevision, ResolvedEvent};

use crate::domain::core::{PerformerId, Wallet, WalletEvent, WalletRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::EventConvertError;
use crate::infrastructure::{stream_name, to_event_data, try_from_resolved_event};

#[derive(Clone)]
pub struct EventStoreWalletRepository {
    client: Client,
}

impl EventStoreWalletRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WalletRepository for EventStoreWalletRepository {
    async fn find_by_id(&self, id: PerformerId) -> Result<Option<Wallet>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<Wallet>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = Wallet::default();
                loop {
                    match stream.next().await {
                        Ok(Some(e)) => entity.apply(TryFrom::try_from(&e)?),
                        Ok(_) => break,
                        Err(eventstore::Error::ResourceDeleted) => return Ok(None),
                        Err(eventstore::Error::ResourceNotFound) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                }
                if entity.peek().is_none() {
                    Ok(None)
                } else {
                    entity.clear();
                    Ok(Some(entity))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&mut self, entity: &mut Wallet) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Wallet>(entity.id());
        let rev = match entity.peek() {
            Some(WalletEvent::WalletOpened { .. }) => ExpectedRevision::NoStream,
            Some(_) => ExpectedRevision::StreamExists,
            None => return Ok(false),
        };
        let events = entity
            .pop_all()
            .into_iter()
            .map(EventData::try_from)
            .collect::<Result<Vec<_>, EventConvertError>>()?;
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                events,
            )
            .await?;
        Ok(true)
    }
}

impl TryFrom<WalletEvent> for EventData {
    type Error = EventConvertError;

    fn try_from(value: WalletEvent) -> Result<Self, Self::Error> {
        to_event_data(value)
    }
}

impl TryFrom<&ResolvedEvent> for WalletEvent {
    type Error = EventConvertError;

    fn try_from(value: &ResolvedEvent) -> Result<Self, Self::Error> {
        try_from_resolved_event(value)
    }
}
