use serde::Serialize;

use crate::error::CompositionError;
use crate::graph::{Phase, Resource, ResourceGraph, ResourceHandle, ResourceId, ResourceSpec};
use crate::validation;

#[derive(Debug, Clone, Serialize)]
pub struct TopicProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionProtocol {
    Http,
    Https,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionProps {
    pub topic: ResourceId,
    pub protocol: SubscriptionProtocol,
    pub endpoint: String,
}

/// Notification topic that forwards alerts to an external oncall webhook.
#[derive(Debug)]
pub struct AlertTopic {
    topic: ResourceHandle,
    subscription: Option<ResourceHandle>,
}

impl AlertTopic {
    pub fn build(
        graph: &mut ResourceGraph,
        id: &ResourceId,
        webhook: Option<&str>,
    ) -> Result<Self, CompositionError> {
        let protocol = webhook
            .map(|url| {
                validation::check_url(url).map_err(CompositionError::InvalidConfig)?;
                Ok::<_, CompositionError>(if url.starts_with("https://") {
                    SubscriptionProtocol::Https
                } else {
                    SubscriptionProtocol::Http
                })
            })
            .transpose()?;

        let topic = graph.add(
            Resource::new(
                id.clone(),
                Phase::Foundation,
                ResourceSpec::Topic(TopicProps {
                    display_name: Some("alerts".into()),
                }),
            ),
            vec![],
        )?;

        let subscription = match (webhook, protocol) {
            (Some(url), Some(protocol)) => Some(graph.add(
                Resource::new(
                    id.child("WebhookSubscription"),
                    Phase::Foundation,
                    ResourceSpec::TopicSubscription(SubscriptionProps {
                        topic: topic.id().clone(),
                        protocol,
                        endpoint: url.to_owned(),
                    }),
                )
                .depends_on([topic.id()]),
                vec![],
            )?),
            _ => {
                tracing::warn!(topic = %topic.id(), "no alert webhook configured; alerts will not be forwarded");
                None
            }
        };

        Ok(Self {
            topic,
            subscription,
        })
    }

    pub fn topic(&self) -> &ResourceHandle {
        &self.topic
    }

    pub fn subscription(&self) -> Option<&ResourceHandle> {
        self.subscription.as_ref()
    }
}
