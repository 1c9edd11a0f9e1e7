use argh::FromArgs;
use std::path::PathBuf;

use pointvis_3d::io::ply;
use pointvis_3d::reference::ReferenceCloud;
use pointvis_3d::visibility::{
    compute_visible_indices, materialize_visible_points, VisibilityOutcome, VisibilityParams,
    DEFAULT_OCTREE_LEVEL,
};

#[derive(FromArgs)]
/// Keep the points of a cloud visible from a viewpoint
struct Args {
    /// path to the input point cloud (.ply file)
    #[argh(option, short = 'i')]
    input_path: PathBuf,

    /// path to the output point cloud (.ply file)
    #[argh(option, short = 'o')]
    output_path: PathBuf,

    /// viewpoint as "x,y,z"
    #[argh(option, from_str_fn(parse_view_point))]
    view_point: [f64; 3],

    /// octree level of the subsampling
    #[argh(option, default = "DEFAULT_OCTREE_LEVEL")]
    octree_level: i32,
}

fn parse_view_point(value: &str) -> Result<[f64; 3], String> {
    let coords = value
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid viewpoint '{value}': {e}"))?;
    coords
        .try_into()
        .map_err(|_| format!("viewpoint '{value}' must have 3 coordinates"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut cloud = ply::read_ply(&args.input_path)?;
    println!("Input cloud '{}': #{} points", cloud.name(), cloud.len());

    let params = VisibilityParams {
        view_point: args.view_point,
        octree_level: args.octree_level,
    };
    let visible = compute_visible_indices(&mut cloud, &params)?;
    println!("{}", serde_json::to_string_pretty(&visible.stats)?);

    let selection = ReferenceCloud::from_indices(&cloud, visible.indices)?;
    match materialize_visible_points(&cloud, &selection)? {
        VisibilityOutcome::Visible(visible_cloud) => {
            ply::write_ply_binary(&args.output_path, &visible_cloud)?;
            println!(
                "Visible cloud '{}': #{} points written to {}",
                visible_cloud.name(),
                visible_cloud.len(),
                args.output_path.display()
            );
        }
        VisibilityOutcome::NoChange => {
            log::info!("All points are visible, nothing written");
        }
        VisibilityOutcome::NoVisiblePoints => {
            log::warn!("No point is visible from {:?}", params.view_point);
        }
    }

    Ok(())
}
