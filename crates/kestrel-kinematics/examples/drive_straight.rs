use kestrel_kinematics::*;

fn main() {
    let track_width = 0.12;
    let wheel_circumference = 0.256;
    let kinematics_result = RobotKinematics::new(track_width, wheel_circumference, 0.6, 1.2);

    let mut current_pose = Pose::new(0.0, 0.0, 0.0);
    let mut reference_pose = Pose::new(0.0, 0.05, 0.0);
    let reference_speeds = ChassisSpeeds::new(0.4, 0.0);
    let dt = 0.01; // Time step in seconds
    let num_steps = 100;

    let controller = match Ramsete::new(2.0, 0.7) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Failed to build controller: {}", e);
            return;
        }
    };

    match kinematics_result {
        Ok(kinematics) => {
            println!("Initializing simulation...");
            println!("  {}", kinematics);
            println!("  {}", controller);
            println!("  Initial pose:     {}", current_pose);
            println!("  Reference pose:   {}", reference_pose);
            println!("  Reference speeds: {}", reference_speeds);
            println!("\nTracking a straight line 5 cm to the left...");

            for i in 0..num_steps {
                let wheels =
                    controller.wheel_speeds(&kinematics, current_pose, reference_pose, reference_speeds);
                match kinematics.update_pose_from_wheel_speeds(current_pose, wheels, dt) {
                    Ok(new_pose) => {
                        current_pose = new_pose;
                        reference_pose.x += reference_speeds.v * dt;
                        if (i + 1) % 10 == 0 {
                            println!("Step {:>3}: Pose: {} Wheels: {}", i + 1, current_pose, wheels);
                        }
                    }
                    Err(e) => {
                        eprintln!("Error during simulation step {}: {:?}", i + 1, e);
                        break; // Stop loop on error
                    }
                }
            }

            println!("\nSimulation complete.");
            println!("Final pose:     {}", current_pose);
            println!("Final lateral error: {:.4} m", reference_pose.y - current_pose.y);
        }
        Err(e) => {
            eprintln!("Failed to initialize kinematics: {:?}", e);
            eprintln!(
                "Please ensure track_width ({}) and wheel_circumference ({}) are positive.",
                track_width, wheel_circumference
            );
        }
    }
}
