use super::items::add_items;
use super::{ReconcileError, ReconciliationSession, RunSummary};
use tracing::{info, warn};

/// List holding device channels in the root web
pub const DEVICE_CHANNELS_LIST: &str = "Device Channels";

/// Field identifying a device channel
pub const CHANNEL_ALIAS_FIELD: &str = "ChannelAlias";

/// Replace the device channels named in the manifest.
///
/// Items sharing an alias with a declared channel are deleted, then every
/// declared channel is added. Nothing happens when the root web has no
/// device-channel list.
pub async fn sync_device_channels(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let channels = session.manifest.section("DeviceChannels", "DeviceChannel");
    if channels.is_empty() {
        return Ok(());
    }

    let cms = session.cms.as_ref();
    let web = &session.web;
    let Some(list) = cms.list_by_title(web, DEVICE_CHANNELS_LIST).await? else {
        warn!("No device channel list, skipping device channels");
        return Ok(());
    };

    for channel in &channels {
        let alias = channel.text(CHANNEL_ALIAS_FIELD, &session.tokens).await?;
        for item in cms.query_items(web, &list, CHANNEL_ALIAS_FIELD, &alias).await? {
            cms.delete_item(web, &list, item.id).await?;
            info!(alias = %alias, item = item.id, "Removed device channel");
        }
    }

    add_items(session, web, &list, &channels, summary).await
}
